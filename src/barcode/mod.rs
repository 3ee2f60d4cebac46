//! Barcode state machine: bind, scan, timeline.
//!
//! Every accepted transition appends a scan event with a monotonically
//! increasing per-barcode sequence, projects the letter status in the
//! same logical transaction, and publishes `letter.status.changed` after
//! the write commits. Concurrent scans on one code serialize in the
//! store; the loser surfaces as `StaleTransition`.

use std::sync::Arc;

use openpenpal_core::clock::Clock;
use openpenpal_core::courier::Courier;
use openpenpal_core::error::CoreError;
use openpenpal_core::events::Event;
use openpenpal_core::identity::{Identity, Permission};
use openpenpal_core::letter::{
    generate_barcode, validate_barcode, Envelope, LetterCode, LetterStatus,
};
use openpenpal_core::opcode::OpCode;
use openpenpal_core::ports::{BarcodeStore, LetterStore};
use openpenpal_core::scan::{ScanEvent, ScanType};
use uuid::Uuid;

use crate::bus::{EventBus, TxEvents};

/// One scan request as it arrives at the edge.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub code: String,
    pub scan_type: ScanType,
    pub op_code: OpCode,
    pub location: Option<String>,
    pub note: Option<String>,
    pub device: Option<String>,
    pub ip: Option<String>,
}

pub struct BarcodeService {
    barcodes: Arc<dyn BarcodeStore>,
    letters: Arc<dyn LetterStore>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
}

impl BarcodeService {
    pub fn new(
        barcodes: Arc<dyn BarcodeStore>,
        letters: Arc<dyn LetterStore>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            barcodes,
            letters,
            clock,
            bus,
        }
    }

    /// Mint `count` fresh barcodes. Collisions with existing codes are
    /// retried; the store's uniqueness check is authoritative.
    pub async fn allocate(&self, count: usize) -> Result<Vec<LetterCode>, CoreError> {
        let mut out = Vec::with_capacity(count);
        let now = self.clock.now();
        let mut rng = rand::thread_rng();
        while out.len() < count {
            let code = generate_barcode(&mut rng);
            let barcode = LetterCode::fresh(code, now)?;
            match self.barcodes.create_barcode(&barcode).await {
                Ok(()) => out.push(barcode),
                Err(CoreError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    pub async fn get(&self, code: &str) -> Result<LetterCode, CoreError> {
        validate_barcode(code)?;
        self.barcodes.get_barcode(code).await
    }

    /// Provision an envelope for a user. Stand-in for the shop handover:
    /// the shop sells the physical object, the core tracks its one use.
    pub async fn provision_envelope(
        &self,
        actor: &Identity,
        user_id: Uuid,
        design: &str,
    ) -> Result<Envelope, CoreError> {
        actor.require_admin()?;
        if design.trim().is_empty() {
            return Err(CoreError::Validation("envelope design is empty".into()));
        }
        let envelope = Envelope {
            id: Uuid::new_v4(),
            user_id,
            design: design.trim().to_string(),
            used_by_code: None,
            purchased_at: self.clock.now(),
        };
        self.barcodes.create_envelope(&envelope).await?;
        Ok(envelope)
    }

    pub async fn get_envelope(&self, id: Uuid) -> Result<Envelope, CoreError> {
        self.barcodes.get_envelope(id).await
    }

    /// Bind an unused barcode to a letter, consuming an envelope if one
    /// is presented. The bind is scan #1 on the timeline.
    pub async fn bind(
        &self,
        actor: &Identity,
        code: &str,
        letter_id: Uuid,
        recipient: OpCode,
        envelope_id: Option<Uuid>,
    ) -> Result<LetterCode, CoreError> {
        actor.require_any_permission(&[Permission::BindBarcode, Permission::CreateLetter])?;
        validate_barcode(code)?;

        let letter = self.letters.get_letter(letter_id).await?;
        if letter.user_id != actor.user_id && actor.require_admin().is_err() {
            return Err(CoreError::PermissionDenied(format!(
                "{} does not own letter {letter_id}",
                actor.username
            )));
        }

        let current = self.barcodes.get_barcode(code).await?;
        let new_status = ScanType::Bind.transition(current.status).map_err(|_| {
            CoreError::AlreadyBound(format!("barcode {code} is {}", current.status.as_str()))
        })?;
        let now = self.clock.now();
        let event = ScanEvent {
            id: Uuid::new_v4(),
            barcode: code.to_string(),
            seq: current.seq + 1,
            scanned_by: actor.user_id,
            scan_type: ScanType::Bind,
            op_code: Some(recipient.clone()),
            old_status: current.status,
            new_status,
            location: None,
            note: None,
            device: None,
            ip: None,
            timestamp: now,
        };

        let mut tx = TxEvents::new();
        tx.push(Event::LetterStatusChanged {
            barcode: code.to_string(),
            letter_id: Some(letter_id),
            old_status: current.status,
            new_status,
            actor: actor.user_id,
            op_code: Some(recipient.clone()),
            location: None,
            at: now,
        });

        match self
            .barcodes
            .bind_barcode(code, letter_id, &recipient, envelope_id, &event)
            .await
        {
            Ok(bound) => {
                tx.commit(&self.bus);
                tracing::info!("barcode {code} bound to letter {letter_id} -> {recipient}");
                Ok(bound)
            }
            Err(e) => {
                tx.discard();
                Err(e)
            }
        }
    }

    /// Apply one courier scan. Pickup/transit/fail scans are authorized
    /// against the courier's reported location; delivery scans against
    /// the bound recipient code. Cancel is an admin scan.
    pub async fn scan(
        &self,
        actor: &Identity,
        courier: Option<&Courier>,
        req: ScanRequest,
    ) -> Result<(LetterCode, ScanEvent), CoreError> {
        validate_barcode(&req.code)?;
        let current = self.barcodes.get_barcode(&req.code).await?;
        let new_status = req.scan_type.transition(current.status)?;

        match req.scan_type {
            ScanType::Cancel => actor.require_admin()?,
            ScanType::Bind => {
                return Err(CoreError::Validation(
                    "bind goes through the bind operation, not scan".into(),
                ))
            }
            _ => {
                actor.require_permission(Permission::ScanBarcode)?;
                let courier = courier.ok_or_else(|| {
                    CoreError::PermissionDenied(format!("{} is not a courier", actor.username))
                })?;
                let target = if req.scan_type.is_delivery_phase() {
                    current.recipient_op_code.clone().ok_or_else(|| {
                        CoreError::Validation(format!("barcode {} has no recipient", req.code))
                    })?
                } else {
                    req.op_code.clone()
                };
                courier.require_scope(&target)?;
            }
        }

        let now = self.clock.now();
        let event = ScanEvent {
            id: Uuid::new_v4(),
            barcode: req.code.clone(),
            seq: current.seq + 1,
            scanned_by: actor.user_id,
            scan_type: req.scan_type,
            op_code: Some(req.op_code.clone()),
            old_status: current.status,
            new_status,
            location: req.location.clone(),
            note: req.note.clone(),
            device: req.device.clone(),
            ip: req.ip.clone(),
            timestamp: now,
        };
        let letter_update = current
            .letter_id
            .map(|id| (id, LetterStatus::from_barcode(new_status)));

        let mut tx = TxEvents::new();
        tx.push(Event::LetterStatusChanged {
            barcode: req.code.clone(),
            letter_id: current.letter_id,
            old_status: current.status,
            new_status,
            actor: actor.user_id,
            op_code: Some(req.op_code.clone()),
            location: req.location.clone(),
            at: now,
        });

        match self.barcodes.record_scan(&event, letter_update).await {
            Ok(()) => {
                tx.commit(&self.bus);
                tracing::debug!(
                    "scan {} on {}: {} -> {}",
                    req.scan_type.as_str(),
                    req.code,
                    current.status.as_str(),
                    new_status.as_str()
                );
                let updated = self.barcodes.get_barcode(&req.code).await?;
                Ok((updated, event))
            }
            Err(e) => {
                tx.discard();
                Err(e)
            }
        }
    }

    pub async fn timeline(&self, code: &str) -> Result<Vec<ScanEvent>, CoreError> {
        validate_barcode(code)?;
        let events = self.barcodes.timeline(code).await?;
        if events.is_empty() {
            // Distinguish "no scans yet" from "no such barcode".
            self.barcodes.get_barcode(code).await?;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testutil;
    use openpenpal_core::events::Topic;
    use openpenpal_core::letter::{BarcodeStatus, LetterVisibility};
    use openpenpal_core::ports::LetterStore as _;
    use openpenpal_core::user::UserRole;

    struct Fixture {
        store: Arc<MemoryStore>,
        bus: Arc<EventBus>,
        svc: BarcodeService,
    }

    fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(openpenpal_core::clock::SystemClock);
        let store = Arc::new(MemoryStore::new(Arc::clone(&clock)));
        let bus = Arc::new(EventBus::default());
        let svc = BarcodeService::new(
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            clock,
            Arc::clone(&bus),
        );
        Fixture { store, bus, svc }
    }

    async fn seed_letter(f: &Fixture, owner: Uuid) -> openpenpal_core::letter::Letter {
        let now = chrono::Utc::now();
        let letter = openpenpal_core::letter::Letter {
            id: Uuid::new_v4(),
            user_id: owner,
            title: None,
            content: "hi".into(),
            style: None,
            status: LetterStatus::Draft,
            visibility: LetterVisibility::Private,
            sender_op_code: None,
            recipient_op_code: None,
            like_count: 0,
            share_count: 0,
            view_count: 0,
            created_at: now,
            updated_at: now,
        };
        f.store.create_letter(&letter).await.unwrap();
        letter
    }

    fn scan_req(code: &str, scan: ScanType, at: &str) -> ScanRequest {
        ScanRequest {
            code: code.into(),
            scan_type: scan,
            op_code: OpCode::parse(at).unwrap(),
            location: None,
            note: None,
            device: None,
            ip: None,
        }
    }

    #[tokio::test]
    async fn bind_pickup_deliver_builds_timeline() {
        let f = fixture();
        let alice = Identity::in_process(Uuid::new_v4(), "alice", UserRole::User);
        let letter = seed_letter(&f, alice.user_id).await;
        let codes = f.svc.allocate(1).await.unwrap();
        let code = codes[0].code.clone();

        let recipient = OpCode::parse("PK5F3D").unwrap();
        f.svc
            .bind(&alice, &code, letter.id, recipient, None)
            .await
            .unwrap();

        let (c1_user, c1) = testutil::seed_courier(&f.store, "c1", 1, "PK5F").await;
        let c1_id = Identity::in_process(c1_user.id, "c1", UserRole::CourierLevel1);

        f.svc
            .scan(&c1_id, Some(&c1), scan_req(&code, ScanType::Pickup, "PK5F01"))
            .await
            .unwrap();
        let (updated, _) = f
            .svc
            .scan(&c1_id, Some(&c1), scan_req(&code, ScanType::Deliver, "PK5F3D"))
            .await
            .unwrap();
        assert_eq!(updated.status, BarcodeStatus::Delivered);

        let timeline = f.svc.timeline(&code).await.unwrap();
        let statuses: Vec<(BarcodeStatus, BarcodeStatus)> = timeline
            .iter()
            .map(|e| (e.old_status, e.new_status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (BarcodeStatus::Unused, BarcodeStatus::Bound),
                (BarcodeStatus::Bound, BarcodeStatus::Picked),
                (BarcodeStatus::Picked, BarcodeStatus::Delivered),
            ]
        );
        assert!(timeline.windows(2).all(|w| w[0].seq + 1 == w[1].seq));

        let letter = f.store.get_letter(letter.id).await.unwrap();
        assert_eq!(letter.status, LetterStatus::Delivered);
    }

    #[tokio::test]
    async fn scan_outside_prefix_is_scope_violation() {
        let f = fixture();
        let alice = Identity::in_process(Uuid::new_v4(), "alice", UserRole::User);
        let letter = seed_letter(&f, alice.user_id).await;
        let code = f.svc.allocate(1).await.unwrap()[0].code.clone();
        f.svc
            .bind(&alice, &code, letter.id, OpCode::parse("QH3B02").unwrap(), None)
            .await
            .unwrap();

        let (c1_user, c1) = testutil::seed_courier(&f.store, "c1", 1, "PK5F").await;
        let c1_id = Identity::in_process(c1_user.id, "c1", UserRole::CourierLevel1);
        let err = f
            .svc
            .scan(&c1_id, Some(&c1), scan_req(&code, ScanType::Pickup, "QH3B02"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ScopeViolation(_)));

        // Nothing was persisted: the timeline still only has the bind.
        assert_eq!(f.svc.timeline(&code).await.unwrap().len(), 1);
        let letter = f.store.get_letter(letter.id).await.unwrap();
        assert_eq!(letter.status, LetterStatus::Generated);
    }

    #[tokio::test]
    async fn double_bind_conflicts() {
        let f = fixture();
        let alice = Identity::in_process(Uuid::new_v4(), "alice", UserRole::User);
        let letter = seed_letter(&f, alice.user_id).await;
        let code = f.svc.allocate(1).await.unwrap()[0].code.clone();
        let recipient = OpCode::parse("PK5F3D").unwrap();
        f.svc
            .bind(&alice, &code, letter.id, recipient.clone(), None)
            .await
            .unwrap();
        let err = f
            .svc
            .bind(&alice, &code, letter.id, recipient, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyBound(_)));
    }

    #[tokio::test]
    async fn events_fire_only_after_commit() {
        let f = fixture();
        let mut rx = f.bus.subscribe(Topic::LetterStatusChanged);
        let alice = Identity::in_process(Uuid::new_v4(), "alice", UserRole::User);
        let letter = seed_letter(&f, alice.user_id).await;
        let code = f.svc.allocate(1).await.unwrap()[0].code.clone();
        let recipient = OpCode::parse("PK5F3D").unwrap();

        f.svc
            .bind(&alice, &code, letter.id, recipient.clone(), None)
            .await
            .unwrap();
        assert!(rx.try_recv().is_ok());

        // Failed rebind publishes nothing.
        let _ = f.svc.bind(&alice, &code, letter.id, recipient, None).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_requires_admin() {
        let f = fixture();
        let alice = Identity::in_process(Uuid::new_v4(), "alice", UserRole::User);
        let letter = seed_letter(&f, alice.user_id).await;
        let code = f.svc.allocate(1).await.unwrap()[0].code.clone();
        f.svc
            .bind(&alice, &code, letter.id, OpCode::parse("PK5F3D").unwrap(), None)
            .await
            .unwrap();

        let (c1_user, c1) = testutil::seed_courier(&f.store, "c1", 1, "PK5F").await;
        let c1_id = Identity::in_process(c1_user.id, "c1", UserRole::CourierLevel1);
        let err = f
            .svc
            .scan(&c1_id, Some(&c1), scan_req(&code, ScanType::Cancel, "PK5F01"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 403);

        let admin = Identity::in_process(Uuid::new_v4(), "root", UserRole::PlatformAdmin);
        let (updated, _) = f
            .svc
            .scan(&admin, None, scan_req(&code, ScanType::Cancel, "PK5F01"))
            .await
            .unwrap();
        assert_eq!(updated.status, BarcodeStatus::Cancelled);
        let letter = f.store.get_letter(letter.id).await.unwrap();
        assert_eq!(letter.status, LetterStatus::Archived);
    }

    #[tokio::test]
    async fn envelope_is_consumed_by_bind() {
        let f = fixture();
        let admin = Identity::in_process(Uuid::new_v4(), "root", UserRole::PlatformAdmin);
        let alice = Identity::in_process(Uuid::new_v4(), "alice", UserRole::User);
        let letter = seed_letter(&f, alice.user_id).await;
        let code = f.svc.allocate(1).await.unwrap()[0].code.clone();

        let err = f
            .svc
            .provision_envelope(&alice, alice.user_id, "classic")
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 403, "provisioning is an admin action");

        let envelope = f
            .svc
            .provision_envelope(&admin, alice.user_id, "classic")
            .await
            .unwrap();
        assert!(!envelope.is_used());

        f.svc
            .bind(
                &alice,
                &code,
                letter.id,
                OpCode::parse("PK5F3D").unwrap(),
                Some(envelope.id),
            )
            .await
            .unwrap();
        let used = f.svc.get_envelope(envelope.id).await.unwrap();
        assert_eq!(used.used_by_code.as_deref(), Some(code.as_str()));
    }

    #[tokio::test]
    async fn timeline_of_unknown_code_is_not_found() {
        let f = fixture();
        let err = f.svc.timeline("OPZZZZZZZZ99").await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }
}
