use dias_batch::terminate;
use dias_core::{JobId, MemoryPlatform};

#[test]
fn one_refusal_does_not_block_the_rest() {
    let platform = MemoryPlatform::new();
    let ids = vec![
        JobId::new("job-1"),
        JobId::new("analysis-2"),
        JobId::new("job-3"),
    ];
    platform.refuse_terminate(&ids[1]);

    let summary = terminate(&platform, &ids);
    assert!(!summary.is_clean());
    assert_eq!(summary.terminated, vec![ids[0].clone(), ids[2].clone()]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, ids[1]);
    assert_eq!(platform.terminated(), summary.terminated);
}

#[test]
fn empty_list_is_clean() {
    let platform = MemoryPlatform::new();
    assert!(terminate(&platform, &[]).is_clean());
}
