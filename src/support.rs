//! Support tickets and client projects.
//!
//! Clients see and act on their own records; agency staff see everything.
//! A staff comment is shown as a reply from the support team.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::store::{Project, ProjectStatus, StoreError, Ticket, TicketComment, TicketPriority, TicketStatus, WorkStore};

pub const STAFF_AUTHOR: &str = "Support Team";

#[derive(Debug, thiserror::Error)]
pub enum SupportError {
    #[error("invalid ticket: {0}")]
    InvalidTicket(String),
    #[error("invalid project: {0}")]
    InvalidProject(String),
    #[error("not allowed to change this ticket")]
    NotAllowed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SupportError {
    pub fn code(&self) -> &'static str {
        match self {
            SupportError::InvalidTicket(_) => "invalid_ticket",
            SupportError::InvalidProject(_) => "invalid_project",
            SupportError::NotAllowed => "ticket_forbidden",
            SupportError::Store(_) => "store_error",
        }
    }
}

pub type SupportResult<T> = Result<T, SupportError>;

#[derive(Debug, Clone, Deserialize)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: TicketPriority,
}

/// Who is acting on a ticket.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub name: String,
    pub staff: bool,
}

impl Actor {
    fn may_touch(&self, ticket: &Ticket) -> bool { self.staff || ticket.user_id == self.user_id }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

fn required(field: &str, value: &str) -> SupportResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(SupportError::InvalidTicket(format!("{field} is required")));
    }
    Ok(v.to_string())
}

#[derive(Clone)]
pub struct SupportService {
    work: Arc<dyn WorkStore>,
}

impl SupportService {
    pub fn new(work: Arc<dyn WorkStore>) -> Self { Self { work } }

    pub async fn create_ticket(&self, owner: &str, req: NewTicket) -> SupportResult<Ticket> {
        let title = required("title", &req.title)?;
        let description = required("description", &req.description)?;
        let now = Utc::now();
        let ticket = Ticket {
            id: format!("T-{}", short_id()),
            user_id: owner.to_string(),
            title,
            description,
            status: TicketStatus::Open,
            priority: req.priority,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.work.put_ticket(ticket.clone()).await?;
        info!(target: "support", "ticket opened id={} uid={} priority={:?}", ticket.id, owner, ticket.priority);
        Ok(ticket)
    }

    /// Tickets visible to `actor`, newest first.
    pub async fn tickets_for(&self, actor: &Actor) -> SupportResult<Vec<Ticket>> {
        let all = self.work.list_tickets().await?;
        Ok(if actor.staff { all } else { all.into_iter().filter(|t| t.user_id == actor.user_id).collect() })
    }

    async fn visible_ticket(&self, id: &str, actor: &Actor) -> SupportResult<Ticket> {
        let ticket = self.work.ticket(id).await?.ok_or_else(|| StoreError::TicketNotFound(id.to_string()))?;
        if !actor.may_touch(&ticket) {
            warn!(target: "support", "ticket {} refused for uid={}", id, actor.user_id);
            return Err(SupportError::NotAllowed);
        }
        Ok(ticket)
    }

    pub async fn ticket(&self, id: &str, actor: &Actor) -> SupportResult<Ticket> {
        self.visible_ticket(id, actor).await
    }

    pub async fn add_comment(&self, id: &str, actor: &Actor, message: &str) -> SupportResult<Ticket> {
        let message = required("message", message)?;
        self.visible_ticket(id, actor).await?;
        let comment = TicketComment {
            id: short_id().to_lowercase(),
            message,
            is_staff_reply: actor.staff,
            author_name: if actor.staff { STAFF_AUTHOR.to_string() } else { actor.name.clone() },
            created_at: Utc::now(),
        };
        Ok(self.work.add_comment(id, comment).await?)
    }

    pub async fn set_status(&self, id: &str, actor: &Actor, status: TicketStatus) -> SupportResult<Ticket> {
        self.visible_ticket(id, actor).await?;
        let ticket = self.work.set_ticket_status(id, status).await?;
        info!(target: "support", "ticket {} -> {:?} by uid={}", id, status, actor.user_id);
        Ok(ticket)
    }

    /// Open a project for a client. Staff only; callers check the role.
    pub async fn create_project(&self, user_id: &str, name: &str) -> SupportResult<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SupportError::InvalidProject("name is required".into()));
        }
        let now = Utc::now();
        let project = Project {
            id: format!("P-{}", short_id()),
            user_id: user_id.to_string(),
            name: name.to_string(),
            status: ProjectStatus::Onboarding,
            created_at: now,
            updated_at: now,
        };
        self.work.put_project(project.clone()).await?;
        info!(target: "support", "project created id={} uid={}", project.id, user_id);
        Ok(project)
    }

    pub async fn projects_for(&self, actor: &Actor) -> SupportResult<Vec<Project>> {
        let all = self.work.list_projects().await?;
        Ok(if actor.staff { all } else { all.into_iter().filter(|p| p.user_id == actor.user_id).collect() })
    }

    pub async fn all_projects(&self) -> SupportResult<Vec<Project>> { Ok(self.work.list_projects().await?) }

    pub async fn all_tickets(&self) -> SupportResult<Vec<Ticket>> { Ok(self.work.list_tickets().await?) }
}
