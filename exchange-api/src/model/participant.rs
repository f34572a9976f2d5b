use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a market participant (device, area or external client).
///
/// `origin` / `origin_id` track the participant that originally created an
/// instrument, which can differ from the current owner once an instrument has
/// been propagated through nested market areas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub origin: Option<String>,
    pub origin_id: Option<Uuid>,
    pub id: Option<Uuid>,
}

impl Participant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: None,
            origin_id: None,
            id: None,
        }
    }

    /// A participant acting on its own behalf: origin fields mirror the owner.
    pub fn owned(name: impl Into<String>, uuid: Uuid) -> Self {
        let name = name.into();
        Self {
            origin: Some(name.clone()),
            origin_id: Some(uuid),
            id: Some(uuid),
            name,
        }
    }
}
