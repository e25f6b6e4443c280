/// Catalog of verification agents offered by the service. `agent_id`
/// stays an opaque string on the wire; unknown ids fall back server-side
/// to the general-purpose agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentProfile {
    pub id: &'static str,
    pub name: &'static str,
    /// Object class assumed when the caller supplies none
    pub default_object_class: &'static str,
}

pub const GENERAL_PURPOSE: &str = "general_purpose";

pub const AGENTS: &[AgentProfile] = &[
    AgentProfile {
        id: GENERAL_PURPOSE,
        name: "General Purpose",
        default_object_class: "item",
    },
    AgentProfile {
        id: "id_document_verifier",
        name: "ID Document Verifier",
        default_object_class: "ID Document",
    },
    AgentProfile {
        id: "product_authenticator",
        name: "Product Authenticator",
        default_object_class: "product",
    },
    AgentProfile {
        id: "text_analyzer",
        name: "Text Analyzer",
        default_object_class: "text document",
    },
    AgentProfile {
        id: "pharmaceutical_authenticator",
        name: "Pharmaceuticals",
        default_object_class: "pharmaceutical product",
    },
    AgentProfile {
        id: "drink_authenticator",
        name: "Drinks & Alcohol",
        default_object_class: "beverage",
    },
    AgentProfile {
        id: "food_authenticator",
        name: "Food & Perishables",
        default_object_class: "food item",
    },
    AgentProfile {
        id: "water_authenticator",
        name: "Water & Beverages",
        default_object_class: "bottled water",
    },
];

/// Look up an agent profile by id.
pub fn find(id: &str) -> Option<&'static AgentProfile> {
    AGENTS.iter().find(|agent| agent.id == id)
}

/// Default object class for an agent; unknown agents verify a generic
/// "item".
pub fn default_object_class(id: &str) -> &'static str {
    find(id).map_or("item", |agent| agent.default_object_class)
}
