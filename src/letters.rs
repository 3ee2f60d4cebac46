//! Letter drafts — the minimal letter surface the backbone needs.
//!
//! Content generation, AI replies and the public plaza live elsewhere;
//! here a letter is created as a draft, listed by its owner, and has its
//! status projected from barcode scans.

use std::sync::Arc;

use openpenpal_core::clock::Clock;
use openpenpal_core::error::CoreError;
use openpenpal_core::identity::{Identity, Permission};
use openpenpal_core::letter::{Letter, LetterStatus, LetterVisibility};
use openpenpal_core::opcode::OpCode;
use openpenpal_core::ports::LetterStore;
use uuid::Uuid;

pub struct CreateLetter {
    pub title: Option<String>,
    pub content: String,
    pub style: Option<String>,
    pub visibility: LetterVisibility,
    pub sender_op_code: Option<OpCode>,
    pub recipient_op_code: Option<OpCode>,
}

pub struct LetterService {
    letters: Arc<dyn LetterStore>,
    clock: Arc<dyn Clock>,
}

impl LetterService {
    pub fn new(letters: Arc<dyn LetterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { letters, clock }
    }

    pub async fn create_draft(
        &self,
        actor: &Identity,
        input: CreateLetter,
    ) -> Result<Letter, CoreError> {
        actor.require_permission(Permission::CreateLetter)?;
        if input.content.trim().is_empty() {
            return Err(CoreError::Validation("letter content is empty".into()));
        }
        let now = self.clock.now();
        let letter = Letter {
            id: Uuid::new_v4(),
            user_id: actor.user_id,
            title: input.title,
            content: input.content,
            style: input.style,
            status: LetterStatus::Draft,
            visibility: input.visibility,
            sender_op_code: input.sender_op_code,
            recipient_op_code: input.recipient_op_code,
            like_count: 0,
            share_count: 0,
            view_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.letters.create_letter(&letter).await?;
        tracing::debug!("letter {} drafted by {}", letter.id, actor.username);
        Ok(letter)
    }

    /// Owner or admin; everyone else gets NotFound rather than a hint
    /// that the letter exists.
    pub async fn get(&self, actor: &Identity, id: Uuid) -> Result<Letter, CoreError> {
        let letter = self.letters.get_letter(id).await?;
        if letter.user_id != actor.user_id && actor.require_admin().is_err() {
            return Err(CoreError::NotFound(format!("letter {id}")));
        }
        Ok(letter)
    }

    pub async fn list_own(&self, actor: &Identity) -> Result<Vec<Letter>, CoreError> {
        self.letters.list_by_owner(actor.user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use openpenpal_core::clock::SystemClock;
    use openpenpal_core::user::UserRole;

    fn service() -> LetterService {
        let store = Arc::new(MemoryStore::new(Arc::new(SystemClock)));
        LetterService::new(store, Arc::new(SystemClock))
    }

    fn draft(content: &str) -> CreateLetter {
        CreateLetter {
            title: None,
            content: content.into(),
            style: None,
            visibility: LetterVisibility::Private,
            sender_op_code: None,
            recipient_op_code: None,
        }
    }

    #[tokio::test]
    async fn draft_then_list() {
        let svc = service();
        let alice = Identity::in_process(Uuid::new_v4(), "alice", UserRole::User);
        let letter = svc.create_draft(&alice, draft("hello")).await.unwrap();
        assert_eq!(letter.status, LetterStatus::Draft);
        let listed = svc.list_own(&alice).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, letter.id);
    }

    #[tokio::test]
    async fn empty_content_rejected() {
        let svc = service();
        let alice = Identity::in_process(Uuid::new_v4(), "alice", UserRole::User);
        let err = svc.create_draft(&alice, draft("   ")).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn strangers_see_not_found() {
        let svc = service();
        let alice = Identity::in_process(Uuid::new_v4(), "alice", UserRole::User);
        let bob = Identity::in_process(Uuid::new_v4(), "bob", UserRole::User);
        let letter = svc.create_draft(&alice, draft("secret")).await.unwrap();
        assert!(svc.get(&alice, letter.id).await.is_ok());
        let err = svc.get(&bob, letter.id).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
        let admin = Identity::in_process(Uuid::new_v4(), "root", UserRole::PlatformAdmin);
        assert!(svc.get(&admin, letter.id).await.is_ok());
    }
}
