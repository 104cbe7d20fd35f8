//! Setup stage ordering and failure handling with fake protocol clients.

mod common;

use common::{
    FakeAccounts, FakeSsh, Listeners, init_tracing, missing, quick_config, ready_instance,
};
use gerrit_harness::{FailureCategory, KeyMaterial, SetupSequencer, SetupStage};

#[tokio::test]
async fn test_stages_run_in_order() {
    if missing("ssh-keygen") {
        return;
    }
    init_tracing();
    let listeners = Listeners::start().await;
    let (_orchestrator, instance) = ready_instance(&listeners).await;

    let accounts = FakeAccounts::default();
    let ssh = FakeSsh {
        events: accounts.events.clone(),
    };
    let sequencer = SetupSequencer::with_connectors(accounts.clone(), ssh);

    let bootstrap = sequencer.run(&instance, &quick_config()).await.unwrap();

    assert_eq!(
        accounts.events.snapshot(),
        vec![
            "create_account".to_string(),
            "insert_public_key".to_string(),
            "login".to_string(),
            "generate_password".to_string(),
            format!("ssh_connect admin@127.0.0.1:{}", listeners.ssh.port),
            "ssh_run gerrit version".to_string(),
            "ssh_close".to_string(),
        ]
    );

    assert_eq!(bootstrap.identity.login, "admin");
    assert_eq!(bootstrap.identity.password, common::GENERATED_PASSWORD);
    assert_eq!(bootstrap.identity.private_key, bootstrap.key.private_key_path);
    assert_eq!(bootstrap.version, "2.14.3");
    assert!(bootstrap.key.generated);
    assert!(bootstrap.key.private_key_path.exists());

    bootstrap.key.remove().unwrap();
}

#[tokio::test]
async fn test_supplied_password_is_set() {
    if missing("ssh-keygen") {
        return;
    }
    let listeners = Listeners::start().await;
    let (_orchestrator, instance) = ready_instance(&listeners).await;

    let accounts = FakeAccounts::default();
    let sequencer = SetupSequencer::with_connectors(accounts.clone(), FakeSsh::default());
    let config = quick_config().with_password("hunter2");

    let bootstrap = sequencer.run(&instance, &config).await.unwrap();

    let events = accounts.events.snapshot();
    assert!(events.contains(&"set_password".to_string()));
    assert!(!events.contains(&"generate_password".to_string()));
    assert_eq!(bootstrap.identity.password, "hunter2");

    bootstrap.key.remove().unwrap();
}

#[tokio::test]
async fn test_account_stage_skipped_without_create_admin() {
    if missing("ssh-keygen") {
        return;
    }
    let listeners = Listeners::start().await;
    let (_orchestrator, instance) = ready_instance(&listeners).await;

    let accounts = FakeAccounts::default();
    let sequencer = SetupSequencer::with_connectors(accounts.clone(), FakeSsh::default());
    let mut config = quick_config();
    config.create_admin = false;
    config.username = "existing".into();

    let bootstrap = sequencer.run(&instance, &config).await.unwrap();

    assert_eq!(
        accounts.events.snapshot(),
        vec!["login".to_string(), "generate_password".to_string()]
    );
    assert_eq!(bootstrap.identity.login, "existing");

    bootstrap.key.remove().unwrap();
}

#[tokio::test]
async fn test_failure_stops_later_stages_and_removes_generated_key() {
    if missing("ssh-keygen") {
        return;
    }
    let listeners = Listeners::start().await;
    let (orchestrator, instance) = ready_instance(&listeners).await;

    let accounts = FakeAccounts {
        fail_on: Some("insert_public_key"),
        ..Default::default()
    };
    let ssh = FakeSsh {
        events: accounts.events.clone(),
    };
    let key_dir = tempfile::tempdir().unwrap();
    let sequencer =
        SetupSequencer::with_connectors(accounts.clone(), ssh).with_key_dir(key_dir.path());

    let err = sequencer.run(&instance, &quick_config()).await.unwrap_err();

    assert_eq!(err.category(), FailureCategory::Setup(SetupStage::Account));
    assert!(!err.never_ready());
    assert_eq!(
        accounts.events.snapshot(),
        vec!["create_account".to_string(), "insert_public_key".to_string()]
    );
    let leftovers = std::fs::read_dir(key_dir.path()).unwrap().count();
    assert_eq!(leftovers, 0, "generated key left behind");

    // The sequencer never touches the container
    assert_eq!(orchestrator.runtime().remove_calls(), 0);
    assert_eq!(orchestrator.runtime().containers(), vec![instance.id]);
}

#[tokio::test]
async fn test_http_failure_is_tagged_with_http_stage() {
    if missing("ssh-keygen") {
        return;
    }
    let listeners = Listeners::start().await;
    let (_orchestrator, instance) = ready_instance(&listeners).await;

    let accounts = FakeAccounts {
        fail_on: Some("generate_password"),
        ..Default::default()
    };
    let sequencer = SetupSequencer::with_connectors(accounts, FakeSsh::default());

    let err = sequencer.run(&instance, &quick_config()).await.unwrap_err();
    assert_eq!(err.category(), FailureCategory::Setup(SetupStage::HttpClient));
}

#[tokio::test]
async fn test_client_failure_is_tagged_with_first_stage_that_runs() {
    if missing("ssh-keygen") {
        return;
    }
    let listeners = Listeners::start().await;
    let (_orchestrator, instance) = ready_instance(&listeners).await;
    let accounts = FakeAccounts {
        fail_on: Some("connect"),
        ..Default::default()
    };
    let sequencer = SetupSequencer::with_connectors(accounts.clone(), FakeSsh::default());

    let err = sequencer.run(&instance, &quick_config()).await.unwrap_err();
    assert_eq!(err.category(), FailureCategory::Setup(SetupStage::Account));

    let mut config = quick_config();
    config.create_admin = false;
    let err = sequencer.run(&instance, &config).await.unwrap_err();
    assert_eq!(err.category(), FailureCategory::Setup(SetupStage::HttpClient));
    assert!(accounts.events.snapshot().is_empty());
}

#[tokio::test]
async fn test_supplied_key_is_used_and_kept() {
    if missing("ssh-keygen") {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let supplied = KeyMaterial::generate_in(dir.path()).await.unwrap();

    let listeners = Listeners::start().await;
    let (_orchestrator, instance) = ready_instance(&listeners).await;
    let sequencer = SetupSequencer::with_connectors(FakeAccounts::default(), FakeSsh::default());
    let config = quick_config().with_private_key(&supplied.private_key_path);

    let bootstrap = sequencer.run(&instance, &config).await.unwrap();
    assert!(!bootstrap.key.generated);
    assert_eq!(bootstrap.identity.private_key, supplied.private_key_path);
    assert_eq!(
        bootstrap.key.public_key.split_whitespace().nth(1),
        supplied.public_key.split_whitespace().nth(1)
    );

    bootstrap.key.remove().unwrap();
    assert!(supplied.private_key_path.exists());
}

#[tokio::test]
async fn test_missing_supplied_key_fails_key_stage() {
    let listeners = Listeners::start().await;
    let (_orchestrator, instance) = ready_instance(&listeners).await;

    let accounts = FakeAccounts::default();
    let sequencer = SetupSequencer::with_connectors(accounts.clone(), FakeSsh::default());
    let config = quick_config().with_private_key("/definitely/not/a/key");

    let err = sequencer.run(&instance, &config).await.unwrap_err();
    assert_eq!(err.category(), FailureCategory::Setup(SetupStage::Key));
    assert!(accounts.events.snapshot().is_empty());
}
