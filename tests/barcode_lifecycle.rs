//! End-to-end lifecycle: bind, scan through to delivery, projection onto
//! letter and task, and the asynchronous reward that follows.

mod helpers;

use std::time::Duration;

use helpers::{wait_until, TestApp};
use openpenpal::barcode::ScanRequest;
use openpenpal_core::identity::Identity;
use openpenpal_core::letter::{BarcodeStatus, LetterStatus, LetterVisibility};
use openpenpal_core::opcode::OpCode;
use openpenpal_core::scan::ScanType;
use openpenpal_core::user::UserRole;

fn identity_for(user: &openpenpal_core::user::User) -> Identity {
    Identity::in_process(user.id, user.username.clone(), user.role)
}

async fn draft_letter(app: &TestApp, owner: &openpenpal_core::user::User) -> openpenpal_core::letter::Letter {
    app.state
        .letters
        .create_draft(
            &identity_for(owner),
            openpenpal::letters::CreateLetter {
                title: Some("hello".into()),
                content: "a letter".into(),
                style: None,
                visibility: LetterVisibility::Private,
                sender_op_code: None,
                recipient_op_code: None,
            },
        )
        .await
        .expect("draft")
}

fn scan(code: &str, scan_type: ScanType, at: &str) -> ScanRequest {
    ScanRequest {
        code: code.into(),
        scan_type,
        op_code: OpCode::parse(at).unwrap(),
        location: Some(at.into()),
        note: None,
        device: None,
        ip: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bind_and_deliver_rewards_exactly_once() {
    let app = TestApp::new();
    let _handles = app.spawn_background();

    let alice = app.seed_user("alice", UserRole::User).await;
    let (c1_user, c1) = app.seed_courier("c1", 1, "PK5F").await;

    let letter = draft_letter(&app, &alice).await;
    let code = app.state.barcodes.allocate(1).await.unwrap()[0].code.clone();

    app.state
        .barcodes
        .bind(
            &identity_for(&alice),
            &code,
            letter.id,
            OpCode::parse("PK5F3D").unwrap(),
            None,
        )
        .await
        .expect("bind");

    let c1_identity = identity_for(&c1_user);
    app.state
        .barcodes
        .scan(&c1_identity, Some(&c1), scan(&code, ScanType::Pickup, "PK5F01"))
        .await
        .expect("pickup");
    app.state
        .barcodes
        .scan(&c1_identity, Some(&c1), scan(&code, ScanType::Deliver, "PK5F3D"))
        .await
        .expect("deliver");

    // Timeline: exactly three scans with the expected transitions.
    let timeline = app.state.barcodes.timeline(&code).await.unwrap();
    let transitions: Vec<(BarcodeStatus, BarcodeStatus)> = timeline
        .iter()
        .map(|e| (e.old_status, e.new_status))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (BarcodeStatus::Unused, BarcodeStatus::Bound),
            (BarcodeStatus::Bound, BarcodeStatus::Picked),
            (BarcodeStatus::Picked, BarcodeStatus::Delivered),
        ]
    );

    // Denormalized letter status follows the latest scan.
    let letter = app.store_letter(letter.id).await;
    assert_eq!(letter.status, LetterStatus::Delivered);

    // The reward flows through bus -> queue -> worker pool exactly once.
    let ledger = &app.state.ledger;
    assert!(
        wait_until(
            || async { ledger.balance(c1_user.id).await.unwrap().balance == 10 },
            Duration::from_secs(5),
        )
        .await,
        "courier_delivery credit should land"
    );
    // Give any stray duplicate a chance to (wrongly) apply, then check.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ledger.balance(c1_user.id).await.unwrap().balance, 10);
    let txns = ledger.transactions(c1_user.id, 50).await.unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].tx_type, "courier_delivery");
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_scope_scan_changes_nothing() {
    let app = TestApp::new();
    let _handles = app.spawn_background();

    let alice = app.seed_user("alice", UserRole::User).await;
    let (c1_user, c1) = app.seed_courier("c1", 1, "PK5F").await;

    let letter = draft_letter(&app, &alice).await;
    let code = app.state.barcodes.allocate(1).await.unwrap()[0].code.clone();
    app.state
        .barcodes
        .bind(
            &identity_for(&alice),
            &code,
            letter.id,
            OpCode::parse("QH3B02").unwrap(),
            None,
        )
        .await
        .expect("bind");

    let err = app
        .state
        .barcodes
        .scan(
            &identity_for(&c1_user),
            Some(&c1),
            scan(&code, ScanType::Pickup, "QH3B02"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 403);

    assert_eq!(app.state.barcodes.timeline(&code).await.unwrap().len(), 1);
    assert_eq!(app.store_letter(letter.id).await.status, LetterStatus::Generated);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        app.state.ledger.balance(c1_user.id).await.unwrap().balance,
        0,
        "a rejected scan mints nothing"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_scans_lose_with_conflict() {
    let app = TestApp::new();
    let alice = app.seed_user("alice", UserRole::User).await;
    let (c1_user, c1) = app.seed_courier("c1", 1, "PK5F").await;
    let letter = draft_letter(&app, &alice).await;
    let code = app.state.barcodes.allocate(1).await.unwrap()[0].code.clone();
    app.state
        .barcodes
        .bind(
            &identity_for(&alice),
            &code,
            letter.id,
            OpCode::parse("PK5F3D").unwrap(),
            None,
        )
        .await
        .expect("bind");

    let c1_identity = identity_for(&c1_user);
    let mut wins = 0;
    let mut losses = 0;
    for _ in 0..8 {
        match app
            .state
            .barcodes
            .scan(
                &c1_identity,
                Some(&c1),
                scan(&code, ScanType::Pickup, "PK5F01"),
            )
            .await
        {
            Ok(_) => wins += 1,
            Err(e) => {
                assert_eq!(e.http_status(), 409, "losers surface as conflicts");
                losses += 1;
            }
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(losses, 7);

    let timeline = app.state.barcodes.timeline(&code).await.unwrap();
    assert_eq!(timeline.len(), 2);
    assert!(timeline.windows(2).all(|w| w[0].seq < w[1].seq));
    assert!(timeline.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

trait LetterLookup {
    async fn store_letter(&self, id: uuid::Uuid) -> openpenpal_core::letter::Letter;
}

impl LetterLookup for TestApp {
    async fn store_letter(&self, id: uuid::Uuid) -> openpenpal_core::letter::Letter {
        use openpenpal_core::ports::LetterStore;
        self.store.get_letter(id).await.expect("letter")
    }
}
