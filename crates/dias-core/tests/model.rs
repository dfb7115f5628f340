use dias_core::{
    ContainerId, DiasError, ExecutableKind, ExecutableRef, FileId, FileRef, InputValue, Location,
    MemoryStore, ObjectStore, StorageState,
};

#[test]
fn locations_are_normalised() {
    let location = Location::new(ContainerId::new("project-a"), "output//single/");
    assert_eq!(location.folder, "/output/single");
    assert_eq!(location.join("/vcf/").folder, "/output/single/vcf");
    assert_eq!(location.join("").folder, "/output/single");
    let root = Location::new(ContainerId::new("project-a"), "/");
    assert_eq!(root.join("x").to_string(), "project-a:/x");
}

#[test]
fn locations_parse_with_or_without_container() {
    let parsed = Location::parse("project-a:/runs/1", None).expect("qualified");
    assert_eq!(parsed.container.as_str(), "project-a");
    let default = ContainerId::new("project-b");
    let bare = Location::parse("/runs/2", Some(&default)).expect("default");
    assert_eq!(bare.to_string(), "project-b:/runs/2");
    assert!(matches!(
        Location::parse("/runs/3", None),
        Err(DiasError::InvalidConfig(_))
    ));
}

#[test]
fn references_and_executables() {
    let file = FileRef::parse("project-a:file-1").expect("file ref");
    assert_eq!(file.container, Some(ContainerId::new("project-a")));
    assert_eq!(file.to_string(), "project-a:file-1");
    assert!(FileRef::parse("project-a:").is_err());

    let workflow = ExecutableRef::parse("project-a:workflow-9").expect("workflow");
    assert_eq!(workflow.id(), "workflow-9");
    assert_eq!(workflow.kind().expect("kind"), ExecutableKind::Workflow);
    assert_eq!(
        ExecutableRef::parse("applet-1").expect("applet").kind().expect("kind"),
        ExecutableKind::Applet
    );
    assert!(ExecutableRef::parse("file-1").is_err());
}

#[test]
fn storage_states_parse_platform_labels() {
    assert_eq!("archival".parse::<StorageState>().expect("state"), StorageState::Archiving);
    assert_eq!("live".parse::<StorageState>().expect("state"), StorageState::Live);
    assert!(StorageState::Unarchiving.is_transient());
    assert!(!StorageState::Archived.is_transient());
    assert!("frozen".parse::<StorageState>().is_err());
}

#[test]
fn file_bindings_keep_the_scalar_list_split() {
    assert_eq!(InputValue::from_files(Vec::new()), None);
    assert_eq!(
        InputValue::from_files(vec![FileId::new("f1")]),
        Some(InputValue::File(FileId::new("f1")))
    );
    let list = InputValue::from_files(vec![FileId::new("f1"), FileId::new("f2")]).expect("list");
    assert!(matches!(list, InputValue::Files(ref ids) if ids.len() == 2));
    assert!(!InputValue::text("x").is_file());
}

#[test]
fn memory_store_finds_reads_and_revives() {
    let store = MemoryStore::new();
    let live = store.add_file("project-a", "/out/vcf", "X1.vcf", StorageState::Live, b"data");
    let cold = store.add_file("project-a", "/out/vcf", "X2.vcf", StorageState::Archived, b"");
    store.add_file("project-a", "/outside", "X3.vcf", StorageState::Live, b"");
    store.add_file("project-b", "/out", "X4.vcf", StorageState::Live, b"");

    let root = Location::new(ContainerId::new("project-a"), "/out");
    let found = store.find(&root, r"\.vcf$").expect("find");
    let names: Vec<&str> = found.iter().map(|file| file.name.as_str()).collect();
    assert_eq!(names, vec!["X1.vcf", "X2.vcf"]);

    let live_ref = FileRef { container: None, id: live };
    assert_eq!(store.read(&live_ref).expect("read"), b"data");
    let cold_ref = FileRef { container: None, id: cold.clone() };
    let err = store.read(&cold_ref).expect_err("not live");
    assert_eq!(err.info().code, "file_not_live");

    store
        .request_revival(&ContainerId::new("project-a"), &[cold.clone()])
        .expect("revive");
    assert_eq!(
        store.describe(&cold_ref).expect("describe").state,
        StorageState::Unarchiving
    );
    assert_eq!(store.revival_requests().len(), 1);
    assert!(store.find(&root, "([").is_err());
}
