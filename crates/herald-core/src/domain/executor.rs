use serde::{Deserialize, Serialize};

use super::ids::{ExecutorId, MessagingIdentity};

/// An external worker allowed to receive tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executor {
    pub id: ExecutorId,
    pub messaging_identity: MessagingIdentity,
    pub full_name: Option<String>,
    pub approved: bool,
}

impl Executor {
    pub fn display_name(&self) -> String {
        self.full_name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}
