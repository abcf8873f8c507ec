mod util;

use lean_cli::encryption::EncryptionKey;
use lean_cli::project::ProjectManager;
use lean_cli::sync::push::{PushManager, push_order};
use lean_cli::sync::{EncryptionOptions, SyncContext, SyncError, SyncOutcome};
use serde_json::json;
use util::{FakeClient, ORG, lean_root, local_project, read_config, write_key};

#[test]
fn push_creates_the_cloud_project_once() {
    let (_tmp, root) = lean_root();
    let dir = local_project(
        &root,
        "Strategies/Alpha",
        json!({"algorithm-language": "Python", "description": "desc"}),
        &[("main.py", "print(1)\n")],
    );
    let client = FakeClient::new();
    let ctx = SyncContext::new(&root, &client).with_organization_id(Some(ORG.to_string()));
    let manager = PushManager::new(&ctx);

    let report = manager
        .push_projects(std::slice::from_ref(&dir), &EncryptionOptions::default())
        .unwrap();
    let result = &report.results[0];
    assert!(result.created);
    assert_eq!(result.outcome, SyncOutcome::Updated);
    assert_eq!(client.creates(), vec!["Strategies/Alpha".to_string()]);

    let config = read_config(&dir);
    let cloud_id = config["cloud-id"].as_u64().unwrap();
    assert_eq!(config["organization-id"], json!(ORG));
    let files = client.files_of(cloud_id);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "main.py");
    assert_eq!(client.project(cloud_id).description, "desc");

    let updates_after_first_push = client.updates().len();
    let report = manager
        .push_projects(std::slice::from_ref(&dir), &EncryptionOptions::default())
        .unwrap();
    assert_eq!(report.results[0].outcome, SyncOutcome::Unchanged);
    assert_eq!(client.creates().len(), 1);
    assert_eq!(client.updates().len(), updates_after_first_push);
}

#[test]
fn push_sends_only_changed_fields() {
    let (_tmp, root) = lean_root();
    let client = FakeClient::new();
    client.add_project(1, "Alpha", &[], &[("main.py", "print(1)")]);
    let dir = local_project(
        &root,
        "Alpha",
        json!({
            "cloud-id": 1,
            "algorithm-language": "Python",
            "lean-engine": 16000,
            "parameters": {"period": "14"},
        }),
        &[("main.py", "print(1)\n")],
    );

    let ctx = SyncContext::new(&root, &client);
    let report = PushManager::new(&ctx)
        .push_projects(&[dir], &EncryptionOptions::default())
        .unwrap();

    assert_eq!(report.results[0].updated, vec!["parameters".to_string()]);
    let updates = client.updates();
    assert_eq!(updates.len(), 1);
    let (id, update) = &updates[0];
    assert_eq!(*id, 1);
    assert!(update.files.is_none());
    assert_eq!(update.parameters.as_ref().unwrap()["period"], "14");
}

#[test]
fn push_failure_does_not_stop_the_batch() {
    let (_tmp, root) = lean_root();
    let client = FakeClient::new();
    client.add_project(1, "A", &[], &[]);
    client.add_project(2, "B", &[], &[]);
    client.fail_updates_of(1);
    let a = local_project(&root, "A", json!({"cloud-id": 1, "algorithm-language": "Python"}), &[("main.py", "a = 1")]);
    let b = local_project(&root, "B", json!({"cloud-id": 2, "algorithm-language": "Python"}), &[("main.py", "b = 1")]);

    let ctx = SyncContext::new(&root, &client);
    let report = PushManager::new(&ctx)
        .push_projects(&[a, b], &EncryptionOptions::default())
        .unwrap();

    assert!(!report.all_succeeded);
    assert_eq!(report.results[0].outcome, SyncOutcome::Failed);
    assert_eq!(report.results[1].outcome, SyncOutcome::Updated);
    assert_eq!(client.files_of(2)[0].content, "b = 1");
}

#[test]
fn push_requires_config_for_every_directory() {
    let (_tmp, root) = lean_root();
    let stray = root.join("NotAProject");
    std::fs::create_dir_all(&stray).unwrap();
    let client = FakeClient::new();
    let ctx = SyncContext::new(&root, &client);

    let result = PushManager::new(&ctx).push_projects(&[stray], &EncryptionOptions::default());
    assert!(matches!(result, Err(SyncError::NotAProject(_))));
    assert!(client.creates().is_empty());
}

#[test]
fn push_pushes_libraries_first() {
    let (_tmp, root) = lean_root();
    let library = local_project(&root, "Library/Lib", json!({"algorithm-language": "Python"}), &[("lib.py", "x = 1")]);
    let alpha = local_project(
        &root,
        "Alpha",
        json!({
            "algorithm-language": "Python",
            "libraries": [{"name": "Lib", "path": "Library/Lib"}],
        }),
        &[("main.py", "import lib")],
    );

    let order = push_order(&ProjectManager::new(&root), std::slice::from_ref(&alpha)).unwrap();
    assert_eq!(order, vec![library.clone(), alpha.clone()]);

    let client = FakeClient::new();
    let ctx = SyncContext::new(&root, &client);
    let report = PushManager::new(&ctx)
        .push_projects(&order, &EncryptionOptions::default())
        .unwrap();
    assert!(report.all_succeeded);
    assert_eq!(client.creates(), vec!["Library/Lib".to_string(), "Alpha".to_string()]);

    let library_id = read_config(&library)["cloud-id"].as_u64().unwrap();
    let alpha_id = read_config(&alpha)["cloud-id"].as_u64().unwrap();
    assert_eq!(client.project(alpha_id).library_ids(), vec![library_id]);
}

#[test]
fn push_fails_when_library_was_never_pushed() {
    let (_tmp, root) = lean_root();
    local_project(&root, "Library/Lib", json!({"algorithm-language": "Python"}), &[]);
    let alpha = local_project(
        &root,
        "Alpha",
        json!({
            "algorithm-language": "Python",
            "libraries": [{"name": "Lib", "path": "Library/Lib"}],
        }),
        &[("main.py", "import lib")],
    );

    let client = FakeClient::new();
    let ctx = SyncContext::new(&root, &client);
    let report = PushManager::new(&ctx)
        .push_projects(&[alpha], &EncryptionOptions::default())
        .unwrap();

    let error = report.results[0].error.as_deref().unwrap();
    assert!(error.contains("has not been pushed"), "{error}");
}

#[test]
fn push_encrypt_requires_registered_key() {
    let (_tmp, root) = lean_root();
    let key_path = write_key(&root, "project.key", "push secret");
    let key = EncryptionKey::load(&key_path).unwrap();
    let client = FakeClient::new();
    client.add_project(1, "Alpha", &[], &[]);
    let dir = local_project(
        &root,
        "Alpha",
        json!({"cloud-id": 1, "algorithm-language": "Python"}),
        &[("main.py", "print('hidden')\n")],
    );
    let ctx = SyncContext::new(&root, &client);
    let manager = PushManager::new(&ctx);

    let report = manager
        .push_projects(std::slice::from_ref(&dir), &EncryptionOptions::encrypt(&key_path))
        .unwrap();
    assert!(report.results[0].error.as_deref().unwrap().contains("not registered"));
    assert!(client.updates().is_empty());

    client.register_key(key.id());
    let report = manager
        .push_projects(std::slice::from_ref(&dir), &EncryptionOptions::encrypt(&key_path))
        .unwrap();
    assert!(report.all_succeeded);

    let cloud = client.project(1);
    assert!(cloud.encrypted);
    assert_eq!(cloud.encryption_key_id(), Some(key.id()));
    let stored = &client.files_of(1)[0].content;
    let cipher = key.cipher(ORG).unwrap();
    assert_eq!(cipher.decrypt("main.py", stored).unwrap().trim(), "print('hidden')");
}

#[test]
fn push_of_encrypted_project_without_key_fails() {
    let (_tmp, root) = lean_root();
    let client = FakeClient::new();
    client.add_project(1, "Alpha", &[], &[]);
    let dir = local_project(
        &root,
        "Alpha",
        json!({"cloud-id": 1, "algorithm-language": "Python", "encrypted": true}),
        &[("main.py", "CIPHERTEXT")],
    );

    let ctx = SyncContext::new(&root, &client);
    let report = PushManager::new(&ctx)
        .push_projects(&[dir], &EncryptionOptions::default())
        .unwrap();

    assert!(report.results[0].error.as_deref().unwrap().contains("not available"));
    assert!(client.updates().is_empty());
}

#[test]
fn push_clears_libraries_and_parameters_removed_locally() {
    let (_tmp, root) = lean_root();
    let client = FakeClient::new();
    client.add_project(1, "Alpha", &[2], &[("main.py", "print(1)")]);
    client.update_project_with(1, |p| {
        p.parameters = vec![lean_cli::api::Parameter {
            key: "period".to_string(),
            value: "14".to_string(),
        }];
    });
    let dir = local_project(
        &root,
        "Alpha",
        json!({"cloud-id": 1, "algorithm-language": "Python"}),
        &[("main.py", "print(1)\n")],
    );

    let ctx = SyncContext::new(&root, &client);
    let manager = PushManager::new(&ctx);
    let report = manager
        .push_projects(std::slice::from_ref(&dir), &EncryptionOptions::default())
        .unwrap();

    let updates = client.updates();
    assert_eq!(updates.len(), 1);
    let update = &updates[0].1;
    assert_eq!(update.libraries, Some(Vec::new()));
    assert_eq!(update.parameters.as_ref().map(|p| p.len()), Some(0));
    assert_eq!(report.results[0].updated, vec!["parameters".to_string(), "libraries".to_string()]);

    let report = manager
        .push_projects(std::slice::from_ref(&dir), &EncryptionOptions::default())
        .unwrap();
    assert_eq!(report.results[0].outcome, SyncOutcome::Unchanged);
    assert_eq!(client.updates().len(), 1);
}
