mod support;

use support::*;
use usage_core::BatchBound;
use usage_db::BatchPartitioner;

#[test]
fn partitions_users_into_contiguous_batches() {
    let stores = setup_stores();
    let conn = &stores.catalog;
    for i in 1..=250 {
        add_user(conn, &format!("user{:03}", i));
    }

    let bounds = BatchPartitioner::new(&settings())
        .compute_batches(conn, 100)
        .expect("partition");
    assert_eq!(
        bounds,
        vec![
            BatchBound::new("user001", "user100"),
            BatchBound::new("user101", "user200"),
            BatchBound::new("user201", "user250"),
        ]
    );
}

#[test]
fn empty_namespace_yields_no_batches() {
    let stores = setup_stores();
    let bounds = BatchPartitioner::new(&settings())
        .compute_batches(&stores.catalog, 10)
        .expect("partition");
    assert!(bounds.is_empty());
}

#[test]
fn only_regular_users_in_zone_are_ranked() {
    let stores = setup_stores();
    let conn = &stores.catalog;
    add_user(conn, "alice");
    add_user(conn, "bob");
    add_user_of_type(conn, "aaron", "rodsadmin");
    add_user_of_type(conn, "zed", "rodsgroup");
    conn.execute(
        "INSERT INTO r_user_main (user_name, zone_name, user_type_name) VALUES ('zoe', 'other', 'rodsuser')",
        [],
    )
    .expect("foreign user");

    let bounds = BatchPartitioner::new(&settings())
        .compute_batches(conn, 5)
        .expect("partition");
    assert_eq!(bounds, vec![BatchBound::new("alice", "bob")]);
}

#[test]
fn single_user_batches() {
    let stores = setup_stores();
    let conn = &stores.catalog;
    for name in ["a", "b", "c"] {
        add_user(conn, name);
    }
    let bounds = BatchPartitioner::new(&settings())
        .compute_batches(conn, 1)
        .expect("partition");
    assert_eq!(
        bounds,
        vec![
            BatchBound::new("a", "a"),
            BatchBound::new("b", "b"),
            BatchBound::new("c", "c"),
        ]
    );
}

#[test]
fn zero_batch_size_is_rejected() {
    let stores = setup_stores();
    assert!(
        BatchPartitioner::new(&settings())
            .compute_batches(&stores.catalog, 0)
            .is_err()
    );
}
