use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the current user may do with a quiz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub view: bool,
    pub attempt: bool,
    pub review_mine: bool,
    pub preview: bool,
    pub manage: bool,
    pub ignore_time_limits: bool,
}

impl Capabilities {
    pub fn for_role(role: &str) -> Self {
        match role.to_ascii_lowercase().as_str() {
            "student" => Self {
                view: true,
                attempt: true,
                review_mine: true,
                ..Self::default()
            },
            "teacher" => Self {
                view: true,
                preview: true,
                review_mine: true,
                ..Self::default()
            },
            "editingteacher" | "manager" | "admin" => Self {
                view: true,
                preview: true,
                review_mine: true,
                manage: true,
                ..Self::default()
            },
            "guest" => Self {
                view: true,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    /// Grant one capability by name. Unknown names are ignored.
    pub fn grant(&mut self, name: &str) {
        match name {
            "view" => self.view = true,
            "attempt" => self.attempt = true,
            "review_mine" => self.review_mine = true,
            "preview" => self.preview = true,
            "manage" => self.manage = true,
            "ignore_time_limits" => self.ignore_time_limits = true,
            other => tracing::debug!(capability = other, "ignoring unknown capability"),
        }
    }
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: Uuid,
    pub role: String,
    pub caps: Capabilities,
}

impl Viewer {
    pub fn is_guest(&self) -> bool {
        self.role.eq_ignore_ascii_case("guest")
    }
}
