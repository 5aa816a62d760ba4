use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pinke_core::{GroupOrderId, Resolution, WorkItem, WorkMeta, WorkStatus};

/// Group order lifecycle.
///
/// `Open` is the pending state; the other three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOrderStatus {
    Open,
    Completed,
    Expired,
    Failed,
}

impl core::fmt::Display for GroupOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkStatus for GroupOrderStatus {
    const PENDING: Self = GroupOrderStatus::Open;

    fn as_str(&self) -> &'static str {
        match self {
            GroupOrderStatus::Open => "open",
            GroupOrderStatus::Completed => "completed",
            GroupOrderStatus::Expired => "expired",
            GroupOrderStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(GroupOrderStatus::Open),
            "completed" => Some(GroupOrderStatus::Completed),
            "expired" => Some(GroupOrderStatus::Expired),
            "failed" => Some(GroupOrderStatus::Failed),
            _ => None,
        }
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, GroupOrderStatus::Open)
    }

    fn is_failure(&self) -> bool {
        matches!(self, GroupOrderStatus::Expired | GroupOrderStatus::Failed)
    }
}

/// A group-purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOrder {
    pub id: GroupOrderId,
    pub title: String,
    pub required_members: i32,
    pub joined_members: i32,
    pub deadline: DateTime<Utc>,
    #[serde(flatten)]
    pub meta: WorkMeta<GroupOrderStatus>,
}

impl GroupOrder {
    pub fn open(
        title: impl Into<String>,
        required_members: i32,
        joined_members: i32,
        deadline: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GroupOrderId::new(),
            title: title.into(),
            required_members,
            joined_members,
            deadline,
            meta: WorkMeta::pending(at),
        }
    }

    /// Outcome once the deadline has passed.
    pub fn decide(&self) -> Resolution<GroupOrderStatus> {
        if self.required_members <= 0 {
            return Resolution::with_reason(
                GroupOrderStatus::Failed,
                format!("invalid required members ({})", self.required_members),
            );
        }
        if self.joined_members >= self.required_members {
            Resolution::new(GroupOrderStatus::Completed)
        } else {
            Resolution::with_reason(
                GroupOrderStatus::Expired,
                format!(
                    "not enough members ({}/{})",
                    self.joined_members, self.required_members
                ),
            )
        }
    }
}

impl WorkItem for GroupOrder {
    type Status = GroupOrderStatus;

    const KIND: &'static str = "group_order";

    fn key(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn meta(&self) -> &WorkMeta<GroupOrderStatus> {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut WorkMeta<GroupOrderStatus> {
        &mut self.meta
    }

    fn eligible_at(&self) -> DateTime<Utc> {
        self.deadline
    }
}
