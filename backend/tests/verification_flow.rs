//! Sign-up, verification mail delivery and code redemption wired together
//! through the in-process task queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ledger::domain::ports::{AfterUserCreated, MailError, MailSender, OutgoingEmail, TaskQueue};
use ledger::domain::task_queue::handlers::{SendVerifyEmailHandler, VerifyEmailSettings};
use ledger::domain::task_queue::{
    DeliveryOutcome, TaskDistributor, TaskKind, TaskProcessor, TaskProcessorConfig,
};
use ledger::domain::{
    Email, EmailVerifier, EnqueueVerifyEmail, Error, ErrorCode, NewUser, TxCoordinator,
    UserLifecycle, Username,
};
use ledger::outbound::memory::{InMemoryLedgerStore, InMemoryTaskQueue};
use ledger::test_support::{MutableClock, NoJitter};
use rstest::{fixture, rstest};

/// Mail transport that is down for the first `outages` sends.
#[derive(Default)]
struct FlakyMail {
    outages: usize,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<OutgoingEmail>>,
}

impl FlakyMail {
    fn failing(outages: usize) -> Self {
        Self {
            outages,
            ..Self::default()
        }
    }

    fn delivered(&self) -> Vec<OutgoingEmail> {
        self.delivered.lock().expect("mail mutex").clone()
    }
}

#[async_trait]
impl MailSender for FlakyMail {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.outages {
            return Err(MailError::unavailable("smtp relay refused the connection"));
        }
        self.delivered.lock().expect("mail mutex").push(email.clone());
        Ok(())
    }
}

struct RejectingHook;

#[async_trait]
impl AfterUserCreated for RejectingHook {
    async fn after_create(&self, _user: &ledger::domain::User) -> Result<(), Error> {
        Err(Error::service_unavailable("queue unreachable"))
    }
}

struct Service {
    clock: Arc<MutableClock>,
    queue: Arc<InMemoryTaskQueue>,
    mail: Arc<FlakyMail>,
    users: UserLifecycle,
    verifier: EmailVerifier,
    enqueue: EnqueueVerifyEmail,
    processor: TaskProcessor,
}

fn service_with(mail: FlakyMail) -> Service {
    let clock = Arc::new(MutableClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid time"),
    ));
    let store = Arc::new(InMemoryLedgerStore::new(clock.clone()));
    let coordinator = TxCoordinator::new(store);
    let queue = Arc::new(InMemoryTaskQueue::default());
    let mail = Arc::new(mail);
    let handler = SendVerifyEmailHandler::new(
        coordinator.clone(),
        mail.clone(),
        clock.clone(),
        VerifyEmailSettings::default(),
    );
    let processor = TaskProcessor::new(queue.clone(), clock.clone(), TaskProcessorConfig::default())
        .with_jitter(Arc::new(NoJitter))
        .register(TaskKind::SendVerifyEmail, Arc::new(handler));
    Service {
        users: UserLifecycle::new(coordinator.clone(), clock.clone()),
        verifier: EmailVerifier::new(coordinator, clock.clone()),
        enqueue: EnqueueVerifyEmail::new(TaskDistributor::new(queue.clone(), clock.clone())),
        clock,
        queue,
        mail,
        processor,
    }
}

#[fixture]
fn service() -> Service {
    service_with(FlakyMail::default())
}

fn new_user(name: &str) -> NewUser {
    NewUser::new(
        Username::new(name).expect("username"),
        "$2a$10$hash",
        format!("{name} Example"),
        Email::new(format!("{name}@example.com")).expect("email"),
    )
    .expect("new user")
}

/// Pull `email_id` and `secret_code` out of the verification link.
fn link_params(body: &str) -> (i64, String) {
    let after = |key: &str| {
        let start = body.find(key).expect("link parameter") + key.len();
        body.get(start..).expect("parameter value")
    };
    let id = after("email_id=")
        .split('&')
        .next()
        .and_then(|raw| raw.parse().ok())
        .expect("numeric email_id");
    let code = after("secret_code=")
        .split('"')
        .next()
        .expect("secret code")
        .to_owned();
    (id, code)
}

#[rstest]
#[tokio::test]
async fn sign_up_mails_a_link_that_verifies_the_address_once(service: Service) {
    let created = service
        .users
        .create_user(new_user("alice"), &service.enqueue)
        .await
        .expect("create user");
    assert!(!created.is_email_verified);

    assert!(service.processor.process_one().await.expect("poll").is_none());
    service.clock.advance_seconds(10);
    let processed = service.processor.process_one().await.expect("poll").expect("task");
    assert_eq!(processed.outcome, DeliveryOutcome::Succeeded);

    let sent = service.mail.delivered();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to[0].as_str(), "alice@example.com");
    let (email_id, code) = link_params(&sent[0].body);

    let verified = service
        .verifier
        .verify_email(email_id, code.clone())
        .await
        .expect("verify");
    assert!(verified.is_verified());
    assert!(verified.verification.is_used);

    let replay = service
        .verifier
        .verify_email(email_id, code)
        .await
        .expect_err("codes redeem once");
    assert_eq!(replay.code(), ErrorCode::InvalidCode);
    let user = service
        .users
        .get_user(Username::new("alice").expect("username"))
        .await
        .expect("user");
    assert!(user.is_email_verified);
}

#[rstest]
#[tokio::test]
async fn failed_sign_up_leaves_neither_user_nor_task(service: Service) {
    let err = service
        .users
        .create_user(new_user("carol"), &RejectingHook)
        .await
        .expect_err("hook failure aborts");
    assert_eq!(err.code(), ErrorCode::ServiceUnavailable);

    let missing = service
        .users
        .get_user(Username::new("carol").expect("username"))
        .await
        .expect_err("user rolled back");
    assert_eq!(missing.code(), ErrorCode::NotFound);

    service
        .users
        .create_user(new_user("dave"), &service.enqueue)
        .await
        .expect("create user");
    let duplicate = service
        .users
        .create_user(new_user("dave"), &service.enqueue)
        .await
        .expect_err("duplicate username");
    assert_eq!(duplicate.code(), ErrorCode::Conflict);

    service.clock.advance_seconds(10);
    assert!(service.processor.process_one().await.expect("poll").is_some());
    assert!(service.processor.process_one().await.expect("poll").is_none());
}

#[tokio::test]
async fn mail_outages_are_retried_with_backoff_until_delivered() {
    let service = service_with(FlakyMail::failing(2));
    service
        .users
        .create_user(new_user("erin"), &service.enqueue)
        .await
        .expect("create user");
    service.clock.advance_seconds(10);

    let first = service.processor.process_one().await.expect("poll").expect("task");
    assert!(matches!(first.outcome, DeliveryOutcome::Retrying { retry_count: 1, .. }));
    assert!(service.processor.process_one().await.expect("poll").is_none());

    service.clock.advance_seconds(1);
    let second = service.processor.process_one().await.expect("poll").expect("task");
    assert!(matches!(second.outcome, DeliveryOutcome::Retrying { retry_count: 2, .. }));

    service.clock.advance_seconds(2);
    let third = service.processor.process_one().await.expect("poll").expect("task");
    assert_eq!(third.outcome, DeliveryOutcome::Succeeded);
    assert_eq!(service.mail.delivered().len(), 1);
    assert!(service.queue.find(third.id).await.expect("find").is_none());
}

#[rstest]
#[tokio::test]
async fn undecodable_payloads_are_dropped_without_retry(service: Service) {
    let distributor = TaskDistributor::new(service.queue.clone(), service.clock.clone());
    let mut options = TaskKind::SendVerifyEmail.default_options();
    options.process_in = std::time::Duration::ZERO;
    let task = distributor
        .enqueue(TaskKind::SendVerifyEmail, b"not json".to_vec(), options)
        .await
        .expect("enqueue");

    let processed = service.processor.process_one().await.expect("poll").expect("task");

    assert_eq!(processed.id, task.id);
    assert!(matches!(processed.outcome, DeliveryOutcome::Skipped { .. }));
    assert!(service.queue.find(task.id).await.expect("find").is_none());
    assert!(service.queue.list_dead_letters(10).await.expect("list").is_empty());
    assert!(service.mail.delivered().is_empty());
}

#[tokio::test]
async fn unknown_users_exhaust_retries_into_the_dead_letter_set() {
    let service = service_with(FlakyMail::default());
    let distributor = TaskDistributor::new(service.queue.clone(), service.clock.clone());
    let mut options = TaskKind::SendVerifyEmail.default_options();
    options.max_retry = 1;
    options.process_in = std::time::Duration::ZERO;
    let task = distributor
        .enqueue(TaskKind::SendVerifyEmail, br#"{"username":"ghost"}"#.to_vec(), options)
        .await
        .expect("enqueue");

    let first = service.processor.process_one().await.expect("poll").expect("task");
    assert!(matches!(first.outcome, DeliveryOutcome::Retrying { retry_count: 1, .. }));
    service.clock.advance_seconds(1);
    let second = service.processor.process_one().await.expect("poll").expect("task");
    assert!(matches!(second.outcome, DeliveryOutcome::DeadLettered { .. }));

    let parked = service.queue.list_dead_letters(10).await.expect("list");
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].id, task.id);
    assert!(parked[0].last_error.as_deref().is_some_and(|err| err.contains("ghost")));
}
