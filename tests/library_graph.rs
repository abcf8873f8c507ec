mod util;

use std::fs;

use lean_cli::language::Language;
use lean_cli::project::libraries::cloud_library_closure;
use lean_cli::project::{AddOutcome, LibraryManager, ProjectError, ProjectManager, RestoreMode};
use lean_cli::sync::push::push_order;
use serde_json::json;
use util::{cloud_project, lean_root, local_project, read_config};

#[test]
fn csharp_references_stay_in_lockstep() {
    let (_tmp, root) = lean_root();
    let projects = ProjectManager::new(&root);
    let project = root.join("Alpha");
    let library = root.join("Library/Tools");
    projects.create_new_project(&project, Language::CSharp).unwrap();
    projects.create_new_project(&library, Language::CSharp).unwrap();

    let libraries = LibraryManager::new(&root);
    assert_eq!(
        libraries.add(&project, &library, RestoreMode::Deferred).unwrap(),
        AddOutcome::Added
    );

    let csproj = fs::read_to_string(project.join("Alpha.csproj")).unwrap();
    assert!(csproj.contains("<ProjectReference Include=\"../Library/Tools/Tools.csproj\""), "{csproj}");
    assert_eq!(read_config(&project)["libraries"][0]["path"], json!("Library/Tools"));

    assert_eq!(
        libraries.add(&project, &library, RestoreMode::Deferred).unwrap(),
        AddOutcome::AlreadyExisted
    );

    libraries.remove(&project, &library, RestoreMode::Deferred).unwrap();
    let csproj = fs::read_to_string(project.join("Alpha.csproj")).unwrap();
    assert!(!csproj.contains("Library/Tools"));
    assert!(read_config(&project).get("libraries").is_none());
}

#[test]
fn reverse_reference_is_a_circular_dependency() {
    let (_tmp, root) = lean_root();
    let first = local_project(&root, "Library/First", json!({"algorithm-language": "Python"}), &[]);
    let second = local_project(&root, "Library/Second", json!({"algorithm-language": "Python"}), &[]);
    let libraries = LibraryManager::new(&root);

    libraries.add(&first, &second, RestoreMode::Deferred).unwrap();
    let error = libraries.add(&second, &first, RestoreMode::Deferred).unwrap_err();
    assert!(matches!(error, ProjectError::CircularDependency { .. }));
    assert!(matches!(
        libraries.add(&first, &first, RestoreMode::Deferred),
        Err(ProjectError::CircularDependency { .. })
    ));
}

#[test]
fn local_closure_is_post_order_and_cycle_safe() {
    let (_tmp, root) = lean_root();
    let alpha = local_project(
        &root,
        "Alpha",
        json!({"algorithm-language": "Python", "libraries": [{"name": "A", "path": "Library/A"}]}),
        &[],
    );
    let a = local_project(
        &root,
        "Library/A",
        json!({"algorithm-language": "Python", "libraries": [
            {"name": "B", "path": "Library/B"},
            {"name": "Missing", "path": "Library/Missing"}
        ]}),
        &[],
    );
    let b = local_project(
        &root,
        "Library/B",
        json!({"algorithm-language": "Python", "libraries": [
            {"name": "A", "path": "Library/A"},
            {"name": "Alpha", "path": "Alpha"}
        ]}),
        &[],
    );

    let closure = ProjectManager::new(&root).project_libraries(&alpha).unwrap();
    assert_eq!(closure, vec![b, a]);
}

#[test]
fn cloud_closure_terminates_on_cycles() {
    let requested = cloud_project(1, "Alpha", &[2]);
    let catalog = vec![
        requested.clone(),
        cloud_project(2, "Library/A", &[3, 2]),
        cloud_project(3, "Library/B", &[1, 2]),
    ];

    let ids: Vec<u64> = cloud_library_closure(std::slice::from_ref(&requested), &catalog)
        .iter()
        .map(|p| p.project_id)
        .collect();
    assert_eq!(ids, vec![2, 3]);
}

#[test]
fn self_reference_resolves_to_the_project_alone() {
    let (_tmp, root) = lean_root();
    let alpha = local_project(
        &root,
        "Alpha",
        json!({"algorithm-language": "Python", "libraries": [{"name": "Alpha", "path": "Alpha"}]}),
        &[],
    );
    let projects = ProjectManager::new(&root);

    assert!(projects.project_libraries(&alpha).unwrap().is_empty());
    assert_eq!(push_order(&projects, std::slice::from_ref(&alpha)).unwrap(), vec![alpha]);

    let requested = cloud_project(1, "Alpha", &[1]);
    assert!(cloud_library_closure(std::slice::from_ref(&requested), std::slice::from_ref(&requested)).is_empty());
}
