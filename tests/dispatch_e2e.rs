use std::cell::{Cell, RefCell};
use std::rc::Rc;

use statebus::{
    deferred, Callback, DispatchError, Dispatcher, Disposition, FireDetails, FireEvent, ListenerParams, ListenerQuery,
    Observed, Registration, TopicFilter, Value,
};

fn counting(dispatcher: &Dispatcher, registration: Registration) -> Rc<Cell<usize>> {
    let hits = Rc::new(Cell::new(0));
    let h = Rc::clone(&hits);
    dispatcher
        .register(registration.callback(move |_, _, _| {
            h.set(h.get() + 1);
            Disposition::Continue
        }))
        .unwrap();
    hits
}

#[test]
fn prefix_matching_works_in_both_directions() {
    let dispatcher = Dispatcher::new();
    let listener = counting(&dispatcher, Registration::on("a.b"));

    dispatcher.fire(["a"], FireDetails::default());
    dispatcher.fire(["a.b.c"], FireDetails::default());
    dispatcher.fire(["ab"], FireDetails::default());
    dispatcher.fire(["a.c"], FireDetails::default());

    assert_eq!(listener.get(), 2);
}

#[test]
fn multi_path_listener_runs_once_per_fire() {
    let dispatcher = Dispatcher::new();
    let listener = counting(&dispatcher, Registration::on_each(["a", "b"]));
    dispatcher.fire(["a", "b"], FireDetails::default());
    assert_eq!(listener.get(), 1);
}

#[test]
fn recursion_on_same_topic_is_suppressed() {
    let dispatcher = Rc::new(Dispatcher::new());
    let depth = Rc::new(Cell::new(0));
    let (weak, d) = (Rc::downgrade(&dispatcher), Rc::clone(&depth));
    dispatcher
        .register(Registration::on("tick").callback(move |_, _, _| {
            d.set(d.get() + 1);
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.fire(["tick"], FireDetails::default());
            }
            Disposition::Continue
        }))
        .unwrap();

    assert!(dispatcher.fire(["tick"], FireDetails::default()).is_some());
    assert_eq!(depth.get(), 1);
    assert!(dispatcher.fire(["tick"], FireDetails::default()).is_some());
    assert_eq!(depth.get(), 2);
}

#[test]
fn handlers_may_fire_other_topics_synchronously() {
    let dispatcher = Rc::new(Dispatcher::new());
    let trail = Rc::new(RefCell::new(Vec::new()));
    for (topic, next) in [("one", Some("two")), ("two", Some("three")), ("three", None)] {
        let (weak, t) = (Rc::downgrade(&dispatcher), Rc::clone(&trail));
        dispatcher
            .register(Registration::on(topic).callback(move |_, _, _| {
                t.borrow_mut().push(topic);
                if let (Some(next), Some(dispatcher)) = (next, weak.upgrade()) {
                    dispatcher.fire([next], FireDetails::default());
                }
                Disposition::Continue
            }))
            .unwrap();
    }

    dispatcher.fire(["one"], FireDetails::default());
    assert_eq!(*trail.borrow(), vec!["one", "two", "three"]);
}

#[test]
fn removal_by_criteria() {
    let dispatcher = Dispatcher::new();
    let shared: Callback = Rc::new(|_: Observed, _: Observed, _: &mut FireEvent| Disposition::Continue);
    dispatcher
        .register(Registration::on_each(["x", "y"]).shared(Rc::clone(&shared)))
        .unwrap();
    dispatcher
        .register(Registration::on("z").shared(Rc::clone(&shared)).tag("ui"))
        .unwrap();
    dispatcher
        .register(
            Registration::any()
                .params(ListenerParams::new().allow_bubbling(true))
                .callback(|_, _, _| Disposition::Continue),
        )
        .unwrap();

    assert_eq!(dispatcher.list_all_topics(), vec!["x", "y", "z"]);
    assert!(dispatcher.unregister(&ListenerQuery::new().tag("ui")));
    assert!(dispatcher.unregister(&ListenerQuery::new().filter(vec!["y".to_string(), "x".to_string()])));
    assert!(dispatcher.unregister(
        &ListenerQuery::new().params(ListenerParams::new().allow_bubbling(true))
    ));
    assert!(dispatcher.is_empty());
    assert!(!dispatcher.unregister(&ListenerQuery::new()));
}

#[test]
fn missing_callback_is_rejected() {
    let dispatcher = Dispatcher::new();
    let err = dispatcher.register(Registration::on_each(["a", "b"])).unwrap_err();
    assert!(matches!(err, DispatchError::InvalidCallback { ref filter } if filter == "[a, b]"));
}

#[test]
fn detach_during_fire_is_safe() {
    let dispatcher = Dispatcher::new();
    let handles = Rc::new(RefCell::new(Vec::new()));
    let runs = Rc::new(RefCell::new(Vec::new()));
    for i in 0..4 {
        let (h, r) = (Rc::clone(&handles), Rc::clone(&runs));
        let handle = dispatcher
            .register(Registration::any().callback(move |_, _, _| {
                r.borrow_mut().push(i);
                if i == 1 {
                    let handles: &Vec<statebus::ListenerHandle> = &h.borrow();
                    handles[1].detach();
                    handles[2].detach();
                }
                Disposition::Continue
            }))
            .unwrap();
        handles.borrow_mut().push(handle);
    }

    dispatcher.fire(["a"], FireDetails::default());
    assert_eq!(*runs.borrow(), vec![0, 1, 3]);
    dispatcher.fire(["a"], FireDetails::default());
    assert_eq!(*runs.borrow(), vec![0, 1, 3, 0, 3]);
}

#[test]
fn dispositions_fold_into_the_event() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(Registration::any().callback(|_, _, _| Disposition::Deferred(deferred(async { Value::Int(1) }))))
        .unwrap();
    dispatcher
        .register(Registration::any().callback(|_, _, e| {
            e.prevent_default();
            Disposition::Continue
        }))
        .unwrap();
    let after = counting(&dispatcher, Registration::any());

    let mut event = dispatcher.fire(["a"], FireDetails::default()).unwrap();
    assert!(event.default_prevented());
    assert!(!event.propagation_stopped());
    assert_eq!(after.get(), 1);
    assert_eq!(event.pending_count(), 1);
    assert_eq!(futures::executor::block_on(event.combined_result().unwrap()), vec![Value::Int(1)]);
}

#[test]
fn attaching_a_plain_value_fails() {
    let mut event = FireEvent::new(FireDetails::default());
    assert_eq!(
        event.attach_result(Disposition::Cancel),
        Err(DispatchError::InvalidDisposition { found: "cancel" })
    );
}

#[test]
fn empty_filter_list_is_any() {
    let dispatcher = Dispatcher::new();
    let listener = counting(&dispatcher, Registration::any().filter(TopicFilter::from(Vec::new())));
    dispatcher.fire(["anything"], FireDetails::default());
    assert_eq!(listener.get(), 1);
}

#[tokio::test]
async fn combined_result_resolves_in_attach_order() {
    let dispatcher = Dispatcher::new();
    for n in [3, 1, 2] {
        dispatcher
            .register(Registration::any().callback(move |_, _, _| {
                Disposition::Deferred(deferred(async move {
                    tokio::task::yield_now().await;
                    Value::Int(n)
                }))
            }))
            .unwrap();
    }

    let mut event = dispatcher.fire(["a"], FireDetails::default()).unwrap();
    let combined = event.combined_result().unwrap();
    assert!(combined.clone().ptr_eq(&event.combined_result().unwrap()));
    assert_eq!(combined.await, vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
}
