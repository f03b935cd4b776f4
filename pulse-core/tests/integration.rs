//! Integration Tests for Reactive System
//!
//! These tests verify that pulses, computeds, effects, batches and contexts
//! work together correctly through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use pulse_core::{
    batch, computed, create_context, effect, on_cleanup, pulse, try_effect, untrack, Context,
    ContextOptions, Equality, FlushPolicy, GraphSnapshot, NodeKind, ReactiveError, ReaderState,
    Recorder,
};

/// Runs 1 -> 2 -> 3 across a plain write and a two-write batch.
#[test]
fn effect_runs_once_per_write_and_once_per_batch() {
    let count = pulse(0);
    let runs = Arc::new(AtomicI32::new(0));

    let _effect = {
        let (count, runs) = (count.clone(), runs.clone());
        effect(move || {
            runs.fetch_add(1, Ordering::SeqCst);
            count.get();
        })
    };
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    count.set(5);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    batch(|| {
        count.set(1);
        count.set(2);
    });
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

/// The computed is lazy: no evaluation between the write and the next read.
#[test]
fn computed_is_lazy_and_cached() {
    let count = pulse(5);
    let evals = Arc::new(AtomicI32::new(0));

    let doubled = {
        let (count, evals) = (count.clone(), evals.clone());
        computed(move || {
            evals.fetch_add(1, Ordering::SeqCst);
            count.get() * 2
        })
    };

    assert_eq!(doubled.get(), 10);
    assert_eq!(evals.load(Ordering::SeqCst), 1);

    count.set(7);
    assert_eq!(evals.load(Ordering::SeqCst), 1);

    assert_eq!(doubled.get(), 14);
    assert_eq!(evals.load(Ordering::SeqCst), 2);
}

#[test]
fn effect_observes_latest_value_after_each_write() {
    let source = pulse(0);
    let observed = Rc::new(Cell::new(-1));

    let _effect = {
        let (source, observed) = (source.clone(), observed.clone());
        effect(move || observed.set(source.get()))
    };

    for value in [3, 1, 4, 1, 5, 9, 2, 6] {
        source.set(value);
        assert_eq!(observed.get(), value);
    }
}

#[test]
fn diamond_runs_effect_once_with_consistent_values() {
    let base = pulse(1);
    let left_evals = Rc::new(Cell::new(0));
    let right_evals = Rc::new(Cell::new(0));

    let left = {
        let (base, evals) = (base.clone(), left_evals.clone());
        computed(move || {
            evals.set(evals.get() + 1);
            base.get() + 1
        })
    };
    let right = {
        let (base, evals) = (base.clone(), right_evals.clone());
        computed(move || {
            evals.set(evals.get() + 1);
            base.get() + 2
        })
    };

    let seen = Rc::new(RefCell::new(Vec::new()));
    let watcher = {
        let (left, right, seen) = (left.clone(), right.clone(), seen.clone());
        effect(move || seen.borrow_mut().push((left.get(), right.get())))
    };

    base.set(10);

    assert_eq!(watcher.run_count(), 2);
    assert_eq!(*seen.borrow(), vec![(2, 3), (11, 12)]);
    assert_eq!(left_evals.get(), 2);
    assert_eq!(right_evals.get(), 2);
}

#[test]
fn untracked_reads_never_trigger() {
    let hidden = pulse(0);
    let runs = Rc::new(Cell::new(0));

    let _effect = {
        let (hidden, runs) = (hidden.clone(), runs.clone());
        effect(move || {
            untrack(|| hidden.get());
            runs.set(runs.get() + 1);
        })
    };

    for value in 1..=5 {
        hidden.set(value);
    }
    assert_eq!(runs.get(), 1);
    assert_eq!(hidden.subscriber_count(), 0);
}

#[test]
fn batch_over_two_sources_runs_effect_once() {
    let a = pulse(1);
    let b = pulse(2);
    let sums = Rc::new(RefCell::new(Vec::new()));

    let _effect = {
        let (a, b, sums) = (a.clone(), b.clone(), sums.clone());
        effect(move || sums.borrow_mut().push(a.get() + b.get()))
    };

    batch(|| {
        a.set(10);
        b.set(20);
    });

    assert_eq!(*sums.borrow(), vec![3, 30]);
}

#[test]
fn disposed_effect_never_reruns() {
    let source = pulse(0);
    let runs = Rc::new(Cell::new(0));

    let watcher = {
        let (source, runs) = (source.clone(), runs.clone());
        effect(move || {
            source.get();
            runs.set(runs.get() + 1);
        })
    };

    watcher.dispose();
    watcher.dispose();
    assert_eq!(watcher.state(), ReaderState::Disposed);

    source.set(1);
    batch(|| source.set(2));
    assert_eq!(runs.get(), 1);
}

#[test]
fn cleanups_precede_next_run_and_disposal() {
    let trigger = pulse(0);
    let log = Rc::new(RefCell::new(Vec::<String>::new()));

    let watcher = {
        let (trigger, log) = (trigger.clone(), log.clone());
        effect(move || {
            let run = trigger.get();
            log.borrow_mut().push(format!("body {run}"));
            let first = log.clone();
            on_cleanup(move || first.borrow_mut().push(format!("a{run}")));
            let second = log.clone();
            on_cleanup(move || second.borrow_mut().push(format!("b{run}")));
        })
    };

    trigger.set(1);
    watcher.dispose();

    assert_eq!(
        *log.borrow(),
        vec!["body 0", "a0", "b0", "body 1", "a1", "b1"]
    );
}

#[test]
fn nested_effects_are_disposed_with_their_owner() {
    let outer_trigger = pulse(0);
    let inner_source = pulse(0);
    let inner_runs = Rc::new(Cell::new(0));

    let outer = {
        let (outer_trigger, inner_source, inner_runs) =
            (outer_trigger.clone(), inner_source.clone(), inner_runs.clone());
        effect(move || {
            outer_trigger.get();
            let (inner_source, inner_runs) = (inner_source.clone(), inner_runs.clone());
            let _ = effect(move || {
                inner_source.get();
                inner_runs.set(inner_runs.get() + 1);
            });
        })
    };
    assert_eq!(inner_runs.get(), 1);

    // Re-running the outer effect replaces the inner one
    outer_trigger.set(1);
    assert_eq!(inner_runs.get(), 2);
    assert_eq!(inner_source.subscriber_count(), 1);

    inner_source.set(1);
    assert_eq!(inner_runs.get(), 3);

    outer.dispose();
    inner_source.set(2);
    assert_eq!(inner_runs.get(), 3);
    assert_eq!(inner_source.subscriber_count(), 0);
}

#[test]
fn self_write_is_reported_as_circular() {
    let count = pulse(0);
    let result = {
        let count = count.clone();
        try_effect(move || {
            let next = count.get() + 1;
            count.try_set(next)
        })
    };

    let err = result.unwrap_err();
    assert!(err.is_circular());
    assert_eq!(count.peek(), 0);
}

#[test]
fn effects_writing_each_other_report_circular() {
    let a = pulse(0);
    let b = pulse(0);

    let _forward = {
        let (a, b) = (a.clone(), b.clone());
        try_effect(move || b.try_set(a.get() + 1)).unwrap()
    };
    let _backward = {
        let (a, b) = (a.clone(), b.clone());
        try_effect(move || {
            let next = b.get();
            if next > 5 {
                a.try_set(next)
            } else {
                Ok(())
            }
        })
        .unwrap()
    };

    // a -> forward -> b -> backward -> a while forward is still running
    let err = a.try_set(10).unwrap_err();
    assert!(err.is_circular());
}

#[test]
#[should_panic(expected = "circular dependency")]
fn infallible_write_panics_on_cycle() {
    let count = pulse(0);
    let count_clone = count.clone();
    let _ = effect(move || {
        let next = count_clone.get() + 1;
        count_clone.set(next);
    });
}

#[test]
fn runaway_manual_flush_hits_the_limit() {
    let ctx = create_context(
        ContextOptions::default()
            .with_flush(FlushPolicy::Manual)
            .with_max_flush_iterations(8),
    );

    let a = ctx.run(|| {
        let a = pulse(0);
        let b = pulse(0);
        let _ping = {
            let (a, b) = (a.clone(), b.clone());
            try_effect(move || b.try_set(a.get() + 1)).unwrap()
        };
        let _pong = {
            let (a, b) = (a.clone(), b.clone());
            try_effect(move || a.try_set(b.get() + 1)).unwrap()
        };
        a
    });

    a.set(100);
    let err = ctx.flush().unwrap_err();
    assert!(matches!(err, ReactiveError::FlushLimitExceeded { limit: 8 }));
    assert_eq!(ctx.pending_count(), 0);
}

#[test]
fn manual_flush_waits_for_host() {
    let ctx = create_context(ContextOptions::default().with_flush(FlushPolicy::Manual));
    let scheduled = Rc::new(Cell::new(0));
    ctx.on_schedule({
        let scheduled = scheduled.clone();
        move || scheduled.set(scheduled.get() + 1)
    });

    let (count, watcher) = ctx.run(|| {
        let count = pulse(0);
        let watcher = {
            let count = count.clone();
            effect(move || {
                count.get();
            })
        };
        (count, watcher)
    });

    count.set(1);
    count.set(2);
    assert_eq!(watcher.run_count(), 1);
    assert_eq!(scheduled.get(), 1);

    ctx.flush().unwrap();
    assert_eq!(watcher.run_count(), 2);
}

#[test]
fn skip_unchanged_ignores_equal_writes() {
    let ctx = create_context(ContextOptions::default());
    let (name, watcher) = ctx.run(|| {
        let name = pulse("ada".to_string());
        let watcher = {
            let name = name.clone();
            effect(move || {
                name.get();
            })
        };
        (name, watcher)
    });

    name.set("ada".to_string());
    assert_eq!(watcher.run_count(), 1);
}

#[test]
fn always_notify_reruns_on_equal_writes() {
    let ctx = create_context(ContextOptions::default().with_equality(Equality::AlwaysNotify));
    let (name, watcher) = ctx.run(|| {
        let name = pulse("ada".to_string());
        let watcher = {
            let name = name.clone();
            effect(move || {
                name.get();
            })
        };
        (name, watcher)
    });

    name.set("ada".to_string());
    assert_eq!(watcher.run_count(), 2);
}

#[test]
fn server_mode_effects_run_once() {
    let ctx = create_context(ContextOptions::server().with_label("render"));
    let html = Rc::new(RefCell::new(String::new()));

    let title = ctx.run(|| {
        let title = pulse("Home".to_string());
        let _ = {
            let (title, html) = (title.clone(), html.clone());
            effect(move || *html.borrow_mut() = format!("<h1>{}</h1>", title.get()))
        };
        title
    });
    assert_eq!(*html.borrow(), "<h1>Home</h1>");

    title.set("Changed".to_string());
    assert_eq!(*html.borrow(), "<h1>Home</h1>");

    ctx.reset();
    assert_eq!(ctx.node_count(), 0);
}

#[test]
fn contexts_are_isolated() {
    let first = create_context(ContextOptions::default().with_label("first"));
    let second = create_context(ContextOptions::default().with_label("second"));

    let (a, a_watcher) = first.run(|| {
        let a = pulse(0);
        let watcher = {
            let a = a.clone();
            effect(move || {
                a.get();
            })
        };
        (a, watcher)
    });
    let b_watcher = second.run(|| {
        let a = a.clone();
        // Once `first` is reset its pulses stop notifying other contexts
        effect(move || {
            a.get();
        })
    });

    first.reset();
    assert!(a_watcher.is_disposed());
    assert!(!b_watcher.is_disposed());
    assert_eq!(second.reader_count(), 1);

    a.set(1);
    assert_eq!(b_watcher.run_count(), 1);
}

/// A computed and an effect living in a context follow a pulse owned by the
/// thread's default context.
#[test]
fn readers_follow_pulses_from_another_context() {
    let global = pulse(1);
    let ctx = create_context(ContextOptions::default().with_label("request"));
    let seen = Rc::new(Cell::new(0));

    let (scaled, watcher) = ctx.run(|| {
        let scaled = {
            let global = global.clone();
            computed(move || global.get() * 10)
        };
        let watcher = {
            let (global, seen) = (global.clone(), seen.clone());
            effect(move || seen.set(global.get()))
        };
        (scaled, watcher)
    });
    assert_eq!(ctx.run(|| scaled.get()), 10);
    assert_eq!(seen.get(), 1);

    global.set(2);
    assert_eq!(ctx.run(|| scaled.get()), 20);
    assert_eq!(scaled.get(), 20);
    assert_eq!(seen.get(), 2);

    global.set(3);
    assert_eq!(seen.get(), 3);
    assert_eq!(watcher.run_count(), 3);

    ctx.reset();
    global.set(4);
    assert_eq!(seen.get(), 3);
}

/// A default-context computed read from a context is followed too.
#[test]
fn readers_follow_computeds_from_another_context() {
    let base = pulse(2);
    let squared = {
        let base = base.clone();
        computed(move || base.get() * base.get())
    };
    let ctx = create_context(ContextOptions::default());
    let seen = Rc::new(RefCell::new(Vec::new()));

    let _watcher = ctx.run(|| {
        let (squared, seen) = (squared.clone(), seen.clone());
        effect(move || seen.borrow_mut().push(squared.get()))
    });

    base.set(3);
    base.set(4);
    assert_eq!(*seen.borrow(), vec![4, 9, 16]);
}

/// One failing effect must not leave the others in the flush stale.
#[test]
fn failing_effect_does_not_starve_siblings() {
    let ctx = create_context(ContextOptions::default());
    let seen = Rc::new(Cell::new(0));

    let (source, _failing, _watcher) = ctx.run(|| {
        let source = pulse(0);
        let failing = {
            let source = source.clone();
            try_effect(move || {
                if source.get() == 1 {
                    Err(ReactiveError::user("rejected"))
                } else {
                    Ok(())
                }
            })
            .unwrap()
        };
        let watcher = {
            let (source, seen) = (source.clone(), seen.clone());
            effect(move || seen.set(source.get()))
        };
        (source, failing, watcher)
    });

    let err = source.try_set(1).unwrap_err();
    assert_eq!(err.to_string(), "reactive body failed: rejected");
    assert_eq!(seen.get(), 1);
    assert_eq!(ctx.pending_count(), 0);

    source.set(2);
    assert_eq!(seen.get(), 2);
}

#[test]
fn repeated_renders_do_not_leak() {
    for request in 0..50 {
        let ctx = create_context(ContextOptions::server());
        ctx.run(|| {
            let data = pulse(request);
            let doubled = {
                let data = data.clone();
                computed(move || data.get() * 2)
            };
            let _ = effect(move || {
                doubled.get();
            });
        });
        assert_eq!(ctx.reader_count(), 2);
        ctx.reset();
        assert_eq!(ctx.node_count(), 0);
        assert_eq!(Context::current().label(), "default");
    }
}

#[test]
fn snapshot_describes_the_live_graph() {
    let ctx = create_context(ContextOptions::default().with_label("snap"));
    let (count, doubled, watcher) = ctx.run(|| {
        let count = pulse(1).with_label("count");
        let doubled = {
            let count = count.clone();
            computed(move || count.get() * 2).with_label("doubled")
        };
        let watcher = {
            let doubled = doubled.clone();
            effect(move || {
                doubled.get();
            })
            .with_label("watcher")
        };
        (count, doubled, watcher)
    });

    let snapshot = ctx.snapshot();
    assert_eq!(snapshot.context.as_deref(), Some("snap"));
    assert_eq!(snapshot.nodes.len(), 3);
    assert_eq!(snapshot.find("doubled").unwrap().kind, NodeKind::Derived);
    assert_eq!(snapshot.dependencies_of(doubled.id()), vec![count.id()]);
    assert_eq!(snapshot.dependents_of(doubled.id()), vec![watcher.id()]);

    let json = snapshot.to_json().unwrap();
    assert!(json.contains("\"watcher\""));

    let decoded = GraphSnapshot::from_msgpack(&snapshot.to_msgpack().unwrap()).unwrap();
    assert_eq!(decoded.edges.len(), snapshot.edges.len());
}

#[test]
fn recorder_counts_runs_and_writes() {
    let ctx = create_context(ContextOptions::default());
    let recorder = Recorder::new();
    ctx.set_inspector(recorder.clone());

    let count = ctx.run(|| {
        let count = pulse(0).with_label("count");
        let _ = {
            let count = count.clone();
            effect(move || {
                count.get();
            })
            .with_label("logger")
        };
        count
    });

    count.set(1);
    count.set(2);
    count.set(2);

    assert_eq!(recorder.find("count").unwrap().writes, 2);
    assert_eq!(recorder.find("logger").unwrap().runs, 3);
}

#[test]
fn user_errors_propagate_to_the_writer() {
    let input = pulse(1);
    let _validator = {
        let input = input.clone();
        try_effect(move || {
            if input.get() < 0 {
                Err(ReactiveError::user("must be positive"))
            } else {
                Ok(())
            }
        })
        .unwrap()
    };

    assert!(matches!(input.try_set(-1), Err(ReactiveError::User(_))));
    assert!(input.try_set(2).is_ok());
}
