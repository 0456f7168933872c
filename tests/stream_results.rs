use arbor::error::ArborError;
use arbor::stream::{DataSelector, DataStream};

#[tokio::test]
async fn stream_appends_in_order_and_resolves_once() {
    let stream = DataStream::for_selector(DataSelector::with_type("Person"));
    stream.add_data(vec![]);
    assert!(stream.data().is_empty(), "empty batches are no-ops");
    stream.add_data(vec![1, 2]);
    stream.add_data(vec![3]);
    assert_eq!(stream.data(), vec![1, 2, 3], "append order preserved");
    assert!(!stream.is_done(), "no terminal signal yet");

    let waiter = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.completed().await })
    };
    stream.data_done();
    let resolved = waiter.await.unwrap().expect("stream resolved");
    assert_eq!(resolved, vec![1, 2, 3]);
    assert!(stream.is_done());
    // awaiting again after completion resolves immediately with the results
    assert_eq!(stream.completed().await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn late_error_does_not_override_completion() {
    let stream = DataStream::new();
    stream.add_data(vec![7]);
    stream.data_done();
    stream.data_error(ArborError::Fetch(String::from("late")));
    assert_eq!(stream.completed().await.unwrap(), vec![7], "completion wins");
}

#[tokio::test]
async fn done_after_error_keeps_the_error() {
    let stream = DataStream::new();
    stream.data_error(ArborError::Fetch(String::from("boom")));
    stream.data_done();
    let error = stream.completed().await.unwrap_err();
    assert!(matches!(*error, ArborError::Fetch(_)), "error is terminal");
}

#[tokio::test]
async fn all_waiters_observe_the_same_error() {
    let stream = DataStream::new();
    let first = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.completed().await })
    };
    let second = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.completed().await })
    };
    stream.data_error(ArborError::Dispatch(String::from("Person")));
    let first = first.await.unwrap().unwrap_err();
    let second = second.await.unwrap().unwrap_err();
    assert!(std::sync::Arc::ptr_eq(&first, &second), "one shared error");
}

#[tokio::test]
async fn appends_after_completion_stay_visible_to_snapshots() {
    let stream = DataStream::new();
    stream.add_data(vec![1]);
    stream.data_done();
    stream.add_data(vec![2]);
    assert_eq!(stream.data(), vec![1, 2], "snapshots see late appends");
}
