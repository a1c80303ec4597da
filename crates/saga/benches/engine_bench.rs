use common::IdentityId;
use contracts::RegistrationMessage;
use contracts::registration::StartIdentityRegistrationData;
use criterion::{Criterion, criterion_group, criterion_main};
use saga::{
    IdentityRegistrationSaga, InMemoryCommandPublisher, InMemoryTimeoutScheduler, SagaEngine,
};
use saga_store::InMemorySagaStore;
use uuid::Uuid;

type BenchEngine = SagaEngine<
    IdentityRegistrationSaga,
    InMemorySagaStore,
    InMemoryCommandPublisher<contracts::RegistrationCommand>,
    InMemoryTimeoutScheduler<RegistrationMessage>,
>;

fn make_engine() -> BenchEngine {
    SagaEngine::new(
        InMemorySagaStore::new(),
        InMemoryCommandPublisher::new(),
        InMemoryTimeoutScheduler::new(),
    )
    .unwrap()
}

fn start_message(identity_id: IdentityId) -> RegistrationMessage {
    RegistrationMessage::start(
        StartIdentityRegistrationData::new("Ada", "Lovelace", "ada@example.org")
            .with_identity_id(identity_id)
            .in_zone("north"),
    )
}

fn happy_path(identity_id: IdentityId) -> Vec<RegistrationMessage> {
    vec![
        start_message(identity_id),
        RegistrationMessage::identity_created(identity_id, None),
        RegistrationMessage::biometrics_captured(identity_id, Uuid::new_v4(), 0.95),
        RegistrationMessage::clan_approval_granted(identity_id, Uuid::new_v4(), Uuid::new_v4(), None),
        RegistrationMessage::did_created(identity_id, Uuid::new_v4(), "did:example:123"),
        RegistrationMessage::zone_access_granted(identity_id, Uuid::new_v4(), Uuid::new_v4()),
        RegistrationMessage::credential_issued(identity_id, Uuid::new_v4()),
    ]
}

fn bench_start_registration(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = make_engine();

    c.bench_function("engine/start_registration", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.handle(start_message(IdentityId::new())).await.unwrap();
            });
        });
    });
}

fn bench_full_registration(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = make_engine();

    c.bench_function("engine/full_registration", |b| {
        b.iter(|| {
            rt.block_on(async {
                for message in happy_path(IdentityId::new()) {
                    engine.handle(message).await.unwrap();
                }
            });
        });
    });
}

fn bench_denied_registration(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = make_engine();

    c.bench_function("engine/denied_registration_with_compensation", |b| {
        b.iter(|| {
            rt.block_on(async {
                let identity_id = IdentityId::new();
                let messages = [
                    start_message(identity_id),
                    RegistrationMessage::identity_created(identity_id, None),
                    RegistrationMessage::biometrics_captured(identity_id, Uuid::new_v4(), 0.9),
                    RegistrationMessage::clan_approval_denied(
                        identity_id,
                        Uuid::new_v4(),
                        Uuid::new_v4(),
                        "unknown to the clan",
                    ),
                ];
                for message in messages {
                    engine.handle(message).await.unwrap();
                }
            });
        });
    });
}

fn bench_duplicate_on_terminal(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = make_engine();
    let identity_id = IdentityId::new();

    // Drive one instance to completion
    rt.block_on(async {
        for message in happy_path(identity_id) {
            engine.handle(message).await.unwrap();
        }
    });

    c.bench_function("engine/duplicate_on_terminal", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .handle(RegistrationMessage::credential_issued(identity_id, Uuid::new_v4()))
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_start_registration,
    bench_full_registration,
    bench_denied_registration,
    bench_duplicate_on_terminal,
);
criterion_main!(benches);
