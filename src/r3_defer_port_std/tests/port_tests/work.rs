use r3_defer::{Closure, ScheduleOutcome, WorkItem, WorkQueue};
use r3_defer_port_std::{deliver_pended, init_logger, is_group_pended};
use std::sync::atomic::{AtomicUsize, Ordering};

mod deferred {
    use super::*;

    r3_defer_port_std::use_port!(unsafe struct P);

    static COUNT1: AtomicUsize = AtomicUsize::new(0);
    static COUNT2: AtomicUsize = AtomicUsize::new(0);
    static CALLBACK1: fn() = || {
        COUNT1.fetch_add(1, Ordering::Relaxed);
    };
    static CALLBACK2: fn() = || {
        COUNT2.fetch_add(1, Ordering::Relaxed);
    };

    static QUEUE: WorkQueue<P> = WorkQueue::new();
    static ITEM1: WorkItem<P> = WorkItem::new(1, Closure::from_ref(&CALLBACK1));
    static ITEM2: WorkItem<P> = WorkItem::new(2, Closure::from_ref(&CALLBACK2));

    #[test]
    fn requests_are_merged_until_delivery() {
        init_logger();

        assert_eq!(QUEUE.schedule(&ITEM2, false), Ok(ScheduleOutcome::Queued));
        assert_eq!(QUEUE.schedule(&ITEM1, false), Ok(ScheduleOutcome::Queued));
        assert_eq!(QUEUE.schedule(&ITEM1, true), Ok(ScheduleOutcome::Merged));
        assert_eq!(QUEUE.schedule(&ITEM2, false), Ok(ScheduleOutcome::Merged));
        assert!(is_group_pended::<P>(1));
        assert!(is_group_pended::<P>(2));
        assert_eq!(QUEUE.is_pending(&ITEM1), Ok(true));

        assert_eq!(deliver_pended(&QUEUE), Ok(2));
        assert_eq!(COUNT1.load(Ordering::Relaxed), 1);
        assert_eq!(COUNT2.load(Ordering::Relaxed), 1);
        assert_eq!(QUEUE.is_pending(&ITEM1), Ok(false));
        assert_eq!(QUEUE.is_pending(&ITEM2), Ok(false));

        // The serviced items can be queued again
        assert_eq!(QUEUE.schedule(&ITEM1, false), Ok(ScheduleOutcome::Queued));
        assert_eq!(deliver_pended(&QUEUE), Ok(1));
        assert_eq!(COUNT1.load(Ordering::Relaxed), 2);
        assert_eq!(deliver_pended(&QUEUE), Ok(0));
    }
}

mod from_handler {
    use super::*;
    use std::sync::Mutex;

    r3_defer_port_std::use_port!(unsafe struct P);

    static OUTCOMES: Mutex<Vec<(&str, ScheduleOutcome)>> = Mutex::new(Vec::new());
    static SEQUENCE: Mutex<Vec<&str>> = Mutex::new(Vec::new());

    fn log_call(name: &'static str) {
        SEQUENCE.lock().unwrap().push(name);
    }

    fn log_outcome(name: &'static str, item: &'static WorkItem<P>, chain: bool) {
        let outcome = QUEUE.schedule(item, chain).unwrap();
        OUTCOMES.lock().unwrap().push((name, outcome));
    }

    static FIRST_CALLBACK: fn() = || {
        log_call("first");
        log_outcome("inline", &INLINE, false);
        log_outcome("chained", &CHAINED, true);
    };
    static INLINE_CALLBACK: fn() = || log_call("inline");
    static CHAINED_CALLBACK: fn() = || log_call("chained");

    static QUEUE: WorkQueue<P> = WorkQueue::new();
    static FIRST: WorkItem<P> = WorkItem::new(4, Closure::from_ref(&FIRST_CALLBACK));
    static INLINE: WorkItem<P> = WorkItem::new(4, Closure::from_ref(&INLINE_CALLBACK));
    static CHAINED: WorkItem<P> = WorkItem::new(4, Closure::from_ref(&CHAINED_CALLBACK));

    #[test]
    fn inline_and_chained_execution() {
        init_logger();

        assert_eq!(QUEUE.schedule(&FIRST, false), Ok(ScheduleOutcome::Queued));
        assert_eq!(deliver_pended(&QUEUE), Ok(2));

        assert_eq!(*SEQUENCE.lock().unwrap(), ["first", "inline", "chained"]);
        assert_eq!(
            *OUTCOMES.lock().unwrap(),
            [
                ("inline", ScheduleOutcome::Inline),
                ("chained", ScheduleOutcome::Queued),
            ]
        );
    }
}

mod disabled_group {
    use super::*;

    r3_defer_port_std::use_port!(unsafe struct P);

    static COUNT: AtomicUsize = AtomicUsize::new(0);
    static CALLBACK: fn() = || {
        COUNT.fetch_add(1, Ordering::Relaxed);
    };

    static QUEUE: WorkQueue<P> = WorkQueue::new();
    static ITEM: WorkItem<P> = WorkItem::new(5, Closure::from_ref(&CALLBACK));

    #[test]
    fn trigger_is_withheld() {
        init_logger();

        QUEUE.disable(5).unwrap();
        assert_eq!(QUEUE.is_enabled(5), Ok(false));

        assert_eq!(QUEUE.schedule(&ITEM, false), Ok(ScheduleOutcome::Queued));
        assert_eq!(deliver_pended(&QUEUE), Ok(0));
        assert!(is_group_pended::<P>(5));
        assert_eq!(COUNT.load(Ordering::Relaxed), 0);

        QUEUE.enable(5).unwrap();
        assert_eq!(deliver_pended(&QUEUE), Ok(1));
        assert_eq!(COUNT.load(Ordering::Relaxed), 1);

        assert!(QUEUE.enable(r3_defer_port_std::NUM_GROUPS as u8).is_err());
    }
}

mod concurrent {
    use super::*;
    use std::{sync::atomic::AtomicBool, thread};

    r3_defer_port_std::use_port!(unsafe struct P);

    static COUNT: AtomicUsize = AtomicUsize::new(0);
    static CALLBACK: fn() = || {
        COUNT.fetch_add(1, Ordering::Relaxed);
    };

    static QUEUE: WorkQueue<P> = WorkQueue::new();
    static ITEM: WorkItem<P> = WorkItem::new(0, Closure::from_ref(&CALLBACK));

    #[test]
    fn every_queued_request_runs_once() {
        init_logger();

        static DONE: AtomicBool = AtomicBool::new(false);

        let producers: Vec<_> = (0..4)
            .map(|_| {
                thread::spawn(|| {
                    let mut num_queued = 0;
                    for _ in 0..200 {
                        match QUEUE.schedule(&ITEM, false).unwrap() {
                            ScheduleOutcome::Queued => num_queued += 1,
                            ScheduleOutcome::Merged => {}
                            ScheduleOutcome::Inline => panic!("not in the item's group"),
                        }
                        thread::yield_now();
                    }
                    num_queued
                })
            })
            .collect();

        let consumer = thread::spawn(|| {
            while !DONE.load(Ordering::Relaxed) {
                deliver_pended(&QUEUE).unwrap();
                thread::yield_now();
            }
        });

        let num_queued: usize = producers.into_iter().map(|t| t.join().unwrap()).sum();
        DONE.store(true, Ordering::Relaxed);
        consumer.join().unwrap();
        deliver_pended(&QUEUE).unwrap();

        assert!(num_queued >= 1);
        assert_eq!(COUNT.load(Ordering::Relaxed), num_queued);
        assert_eq!(QUEUE.is_pending(&ITEM), Ok(false));
    }
}
