//! S5: a reservation that would exceed an ancestor's memory limit fails and
//! leaves every scope's counters exactly where they were before the attempt.

use junction::resource::{Limits, ResourceTree};

#[tokio::test]
async fn failed_reservation_rolls_back_without_touching_ancestors() {
    let tree = ResourceTree::new(Limits::memory(1024 * 1024));

    tree.reserve_memory(tree.transient(), 800 * 1024, 0).unwrap();

    let conn = tree.new_connection_scope(None, Limits::unbounded());
    let result = tree.reserve_memory(conn.id, 300 * 1024, 0);

    assert!(matches!(result, Err(junction::Error::ResourceLimitExceeded)));
    assert_eq!(tree.stat(tree.transient()).memory, 800 * 1024);
    assert_eq!(tree.stat(conn.id).memory, 0);

    tree.release_memory(tree.transient(), 800 * 1024);
    tree.done(conn.id);
}
