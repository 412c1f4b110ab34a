use std::sync::Arc;

use parking_lot::Mutex;
use pm_domain::model::{EventKind, Session};
use pm_events::{EventBus, Sequencer, UserEventBus};

#[test]
fn interleaved_buses_yield_unique_increasing_sequences() {
    let sequencer = Arc::new(Sequencer::new());
    let global = EventBus::with_sequencer(sequencer.clone());
    let users = UserEventBus::new(sequencer.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _g = global.subscribe(move |e| {
        sink.lock().push(e.sequence);
        Ok(())
    });
    let sink = seen.clone();
    let _u = users.subscribe_for_user("u1", move |e| {
        sink.lock().push(e.sequence);
        Ok(())
    });

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let global = global.clone();
            let users = users.clone();
            std::thread::spawn(move || {
                let session = Session::new("http://localhost:3000", None);
                for _ in 0..25 {
                    if i % 2 == 0 {
                        global.emit(EventKind::SessionUpdated, &session.id, session.clone());
                    } else {
                        users.emit_for_user("u1", EventKind::SessionUpdated, &session.id, session.clone());
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let got = seen.lock().clone();
    assert_eq!(got.len(), 100);
    assert!(got.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(sequencer.current(), 100);
}
