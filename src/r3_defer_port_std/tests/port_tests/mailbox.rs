use r3_defer::{EventClosure, EventRegistration, Mailbox, NotifyOutcome};
use r3_defer_port_std::{init_logger, StdSemaphore};
use std::sync::Mutex;

mod dispatcher_thread {
    use super::*;
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
        time::{Duration, Instant},
    };

    r3_defer_port_std::use_port!(unsafe struct P);

    const NUM_PRODUCERS: usize = 4;
    const NUM_EVENTS: usize = 16;

    static RECEIVED_ODD: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    static RECEIVED_ALL: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    static ODD_HANDLER: fn(u32, usize) = |_, context| RECEIVED_ODD.lock().unwrap().push(context);
    static ALL_HANDLER: fn(u32, usize) = |_, context| RECEIVED_ALL.lock().unwrap().push(context);

    static MAILBOX: Mailbox<P, StdSemaphore, 64> = Mailbox::new(StdSemaphore::new(64));
    static ODD: EventRegistration<P> =
        EventRegistration::new(0b01, EventClosure::from_ref(&ODD_HANDLER));
    static ALL: EventRegistration<P> =
        EventRegistration::new(0b11, EventClosure::from_ref(&ALL_HANDLER));

    #[test]
    fn events_from_producer_threads() {
        init_logger();

        static STOP: AtomicBool = AtomicBool::new(false);

        MAILBOX.add_callback(&ODD).unwrap();
        MAILBOX.add_callback(&ALL).unwrap();
        assert_eq!(MAILBOX.global_mask(), 0b11);
        assert_eq!(MAILBOX.notify(0b100, 0), Ok(NotifyOutcome::Filtered));

        let dispatcher = thread::spawn(|| {
            while !STOP.load(Ordering::Relaxed) {
                MAILBOX.wait_and_dispatch(Some(10)).unwrap();
            }
        });

        let producers: Vec<_> = (0..NUM_PRODUCERS)
            .map(|producer| {
                thread::spawn(move || {
                    for i in 0..NUM_EVENTS {
                        let context = producer * 100 + i;
                        let mask = if i % 2 == 1 { 0b01 } else { 0b10 };
                        assert_ne!(MAILBOX.notify(mask, context), Ok(NotifyOutcome::Filtered));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while RECEIVED_ALL.lock().unwrap().len() < NUM_PRODUCERS * NUM_EVENTS {
            assert!(Instant::now() < deadline, "events were not dispatched in time");
            thread::sleep(Duration::from_millis(1));
        }
        STOP.store(true, Ordering::Relaxed);
        dispatcher.join().unwrap();

        // The total number of events fits in the ring buffer
        assert_eq!(MAILBOX.drop_count(), Ok(0));
        assert_eq!(MAILBOX.is_empty(), Ok(true));

        let all = RECEIVED_ALL.lock().unwrap();
        let odd = RECEIVED_ODD.lock().unwrap();
        assert_eq!(odd.len(), NUM_PRODUCERS * NUM_EVENTS / 2);
        assert!(odd.iter().all(|context| context % 2 == 1));

        // Each producer's events arrive in the order they were posted
        for producer in 0..NUM_PRODUCERS {
            let from_producer: Vec<usize> = all
                .iter()
                .copied()
                .filter(|context| context / 100 == producer)
                .map(|context| context % 100)
                .collect();
            assert_eq!(from_producer, (0..NUM_EVENTS).collect::<Vec<_>>());
        }
    }
}

mod overflow {
    use super::*;

    r3_defer_port_std::use_port!(unsafe struct P);

    static RECEIVED: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    static HANDLER: fn(u32, usize) = |_, context| RECEIVED.lock().unwrap().push(context);

    static MAILBOX: Mailbox<P, StdSemaphore, 4> = Mailbox::new(StdSemaphore::new(8));
    static REG: EventRegistration<P> = EventRegistration::new(!0, EventClosure::from_ref(&HANDLER));

    #[test]
    fn oldest_event_is_dropped() {
        init_logger();

        MAILBOX.add_callback(&REG).unwrap();
        for context in 1..=4 {
            assert_eq!(MAILBOX.notify(1, context), Ok(NotifyOutcome::Queued));
        }
        assert_eq!(MAILBOX.notify(1, 5), Ok(NotifyOutcome::Overflowed));
        assert_eq!(MAILBOX.drop_count(), Ok(1));
        assert_eq!(MAILBOX.len(), Ok(4));
        assert_eq!(MAILBOX.semaphore().count(), 5);

        for _ in 0..4 {
            assert_eq!(MAILBOX.wait_and_dispatch(Some(0)), Ok(true));
        }
        assert_eq!(*RECEIVED.lock().unwrap(), [2, 3, 4, 5]);

        // The excess count left by the dropped event is absorbed
        assert_eq!(MAILBOX.wait_and_dispatch(Some(0)), Ok(false));
        assert_eq!(MAILBOX.semaphore().count(), 0);
        assert_eq!(MAILBOX.wait_and_dispatch(Some(1)), Ok(false));

        assert_eq!(MAILBOX.remove_callback(&REG), Ok(true));
        assert_eq!(MAILBOX.notify(1, 6), Ok(NotifyOutcome::Filtered));
        assert_eq!(MAILBOX.semaphore().count(), 0);
    }
}

mod unregister_from_handler {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    r3_defer_port_std::use_port!(unsafe struct P);

    static COUNT: AtomicUsize = AtomicUsize::new(0);
    static HANDLER: fn(u32, usize) = |_, _| {
        COUNT.fetch_add(1, Ordering::Relaxed);
        assert_eq!(MAILBOX.remove_callback(&REG), Ok(true));
    };

    static MAILBOX: Mailbox<P, StdSemaphore, 8> = Mailbox::new(StdSemaphore::new(8));
    static REG: EventRegistration<P> = EventRegistration::new(1, EventClosure::from_ref(&HANDLER));

    #[test]
    fn handler_removes_itself() {
        init_logger();

        MAILBOX.add_callback(&REG).unwrap();
        assert_eq!(MAILBOX.notify(1, 0), Ok(NotifyOutcome::Queued));
        assert_eq!(MAILBOX.wait_and_dispatch(None), Ok(true));

        assert_eq!(COUNT.load(Ordering::Relaxed), 1);
        assert_eq!(MAILBOX.global_mask(), 0);
        assert_eq!(MAILBOX.notify(1, 0), Ok(NotifyOutcome::Filtered));

        // It can be registered again
        MAILBOX.add_callback(&REG).unwrap();
        assert_eq!(MAILBOX.global_mask(), 1);
    }
}

mod bounded_semaphore {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::VecDeque;

    r3_defer_port_std::use_port!(unsafe struct P);

    const CAPACITY: usize = 4;

    /// Construct a mailbox whose semaphore saturates at `max_count`. Its only
    /// registration appends the context values of received events to the
    /// returned `Vec`.
    fn setup(
        max_count: usize,
    ) -> (&'static Mailbox<P, StdSemaphore, CAPACITY>, &'static Mutex<Vec<usize>>) {
        let received: &'static Mutex<Vec<usize>> = Box::leak(Box::new(Mutex::new(Vec::new())));
        let handler: &'static _ = Box::leak(Box::new(move |_: u32, context: usize| {
            received.lock().unwrap().push(context);
        }));
        let reg: &'static EventRegistration<P> = Box::leak(Box::new(EventRegistration::new(
            1,
            EventClosure::from_ref(handler),
        )));
        let mailbox: &'static Mailbox<P, StdSemaphore, CAPACITY> =
            Box::leak(Box::new(Mailbox::new(StdSemaphore::new(max_count))));
        mailbox.add_callback(reg).unwrap();
        (mailbox, received)
    }

    #[test]
    fn records_beyond_semaphore_limit_are_dispatched() {
        init_logger();

        let (mailbox, received) = setup(1);
        for context in 1..=3 {
            assert_eq!(mailbox.notify(1, context), Ok(NotifyOutcome::Queued));
        }
        assert_eq!(mailbox.semaphore().count(), 1);

        while mailbox.wait_and_dispatch(Some(5)).unwrap() {}
        assert_eq!(*received.lock().unwrap(), [1, 2, 3]);
        assert_eq!(mailbox.is_empty(), Ok(true));
    }

    /// Interleave `notify` and `wait_and_dispatch` calls and check that every
    /// stored record is dispatched regardless of the semaphore's limit.
    #[quickcheck]
    fn stored_records_are_never_stranded(max_count: u8, bytecode: Vec<u8>) {
        init_logger();

        let max_count = usize::from(max_count % 8) + 1;
        let (mailbox, received) = setup(max_count);
        let mut reference = VecDeque::new();
        let mut expected = Vec::new();

        for (context, &instr) in bytecode.iter().enumerate() {
            if instr % 4 == 0 {
                let dispatched = mailbox.wait_and_dispatch(Some(0)).unwrap();
                assert_eq!(dispatched, !reference.is_empty());
                expected.extend(reference.pop_front());
            } else {
                mailbox.notify(1, context).unwrap();
                if reference.len() == CAPACITY {
                    reference.pop_front();
                }
                reference.push_back(context);
            }
            assert!(mailbox.semaphore().count() <= max_count);
        }

        while mailbox.wait_and_dispatch(Some(0)).unwrap() {}
        expected.extend(reference);
        assert_eq!(*received.lock().unwrap(), expected);
    }
}
