//! Stress tests for the bounded work-stealing queue.

use phasework::deque::{Steal, work_queue};
use phasework::task::TaskDescriptor;
use phasework::{JobId, QueueFull};
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::thread;

const TASKS: usize = 50_000;
const THIEVES: usize = 4;
const QUEUES: usize = 4;
const SEEDED: usize = 200;

#[test]
fn test_owner_and_thieves_take_each_task_once() {
    let (queue, stealer) = work_queue(256).unwrap();
    let taken: Arc<Vec<AtomicU8>> = Arc::new((0..TASKS).map(|_| AtomicU8::new(0)).collect());
    let done = Arc::new(AtomicBool::new(false));
    let stolen = Arc::new(AtomicUsize::new(0));

    let thieves: Vec<_> = (0..THIEVES)
        .map(|_| {
            let stealer = stealer.clone();
            let taken = Arc::clone(&taken);
            let done = Arc::clone(&done);
            let stolen = Arc::clone(&stolen);
            thread::spawn(move || {
                loop {
                    match stealer.steal() {
                        Steal::Success(task) => {
                            taken[task.job.index()].fetch_add(1, Ordering::Relaxed);
                            stolen.fetch_add(1, Ordering::Relaxed);
                        }
                        Steal::Retry => continue,
                        Steal::Empty if done.load(Ordering::Acquire) => break,
                        Steal::Empty => std::hint::spin_loop(),
                    }
                }
            })
        })
        .collect();

    for i in 0..TASKS {
        let mut task = TaskDescriptor::new(JobId::new(i as u16));
        // On overflow the owner works off its own queue until there is room.
        while let Err(QueueFull(rejected)) = queue.push(task) {
            task = rejected;
            if let Some(own) = queue.pop() {
                taken[own.job.index()].fetch_add(1, Ordering::Relaxed);
            }
        }
        if i % 3 == 0 {
            if let Some(own) = queue.pop() {
                taken[own.job.index()].fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    while let Some(own) = queue.pop() {
        taken[own.job.index()].fetch_add(1, Ordering::Relaxed);
    }
    done.store(true, Ordering::Release);

    for t in thieves {
        t.join().expect("thief panicked");
    }

    for (i, count) in taken.iter().enumerate() {
        assert_eq!(count.load(Ordering::Relaxed), 1, "task {i}");
    }
    assert!(queue.is_empty());
    println!("thieves took {} of {TASKS}", stolen.load(Ordering::Relaxed));
}

#[test]
fn test_last_item_race_has_single_winner() {
    // Owner pop and thief steal race for a lone record many times over.
    let (queue, stealer) = work_queue(4).unwrap();
    for round in 0..2000u16 {
        queue.push(TaskDescriptor::new(JobId::new(round))).unwrap();

        let thief = {
            let stealer = stealer.clone();
            thread::spawn(move || {
                loop {
                    match stealer.steal() {
                        Steal::Retry => continue,
                        other => return other.success(),
                    }
                }
            })
        };
        let mine = queue.pop();
        let theirs = thief.join().unwrap();

        match (mine, theirs) {
            (Some(t), None) | (None, Some(t)) => assert_eq!(t.job, JobId::new(round)),
            (a, b) => panic!("round {round}: owner {a:?}, thief {b:?}"),
        }
        assert!(queue.is_empty());
    }
}

#[test]
fn test_full_queue_rejects_and_returns_task() {
    let (queue, stealer) = work_queue(8).unwrap();
    for i in 0..8 {
        queue.push(TaskDescriptor::new(JobId::new(i))).unwrap();
    }
    let overflow = TaskDescriptor::new(JobId::new(99));
    assert_eq!(queue.push(overflow), Err(QueueFull(overflow)));

    // One steal frees one slot.
    assert_eq!(stealer.steal().success(), Some(TaskDescriptor::new(JobId::new(0))));
    queue.push(overflow).unwrap();
    assert_eq!(queue.len(), 8);
    assert_eq!(queue.pop(), Some(overflow));
}

#[test]
fn test_seeded_queues_drain_exactly_once() {
    // Every queue starts full; owners pop their own and then rotate over
    // their peers, the way idle workers look for work.
    let total = QUEUES * SEEDED;
    let taken: Arc<Vec<AtomicU8>> = Arc::new((0..total).map(|_| AtomicU8::new(0)).collect());
    let (queues, stealers): (Vec<_>, Vec<_>) = (0..QUEUES)
        .map(|q| {
            let (queue, stealer) = work_queue(256).unwrap();
            for i in 0..SEEDED {
                queue
                    .push(TaskDescriptor::new(JobId::new((q * SEEDED + i) as u16)))
                    .unwrap();
            }
            (queue, stealer)
        })
        .unzip();
    let stealers = Arc::new(stealers);
    let start = Arc::new(Barrier::new(QUEUES));

    let owners: Vec<_> = queues
        .into_iter()
        .enumerate()
        .map(|(me, queue)| {
            let stealers = Arc::clone(&stealers);
            let taken = Arc::clone(&taken);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut own = 0usize;
                let mut stolen = 0usize;
                let mut round = 0usize;
                loop {
                    if let Some(task) = queue.pop() {
                        taken[task.job.index()].fetch_add(1, Ordering::Relaxed);
                        own += 1;
                        continue;
                    }
                    let mut found = false;
                    for offset in 0..QUEUES {
                        let victim = (me + 1 + round + offset) % QUEUES;
                        if victim == me {
                            continue;
                        }
                        loop {
                            match stealers[victim].steal() {
                                Steal::Success(task) => {
                                    taken[task.job.index()].fetch_add(1, Ordering::Relaxed);
                                    stolen += 1;
                                    found = true;
                                    break;
                                }
                                Steal::Retry => continue,
                                Steal::Empty => break,
                            }
                        }
                        if found {
                            break;
                        }
                    }
                    round += 1;
                    // Nothing is ever pushed again, so an empty sweep is final.
                    if !found {
                        return (own, stolen);
                    }
                }
            })
        })
        .collect();

    let mut claimed = 0;
    for owner in owners {
        let (own, stolen) = owner.join().expect("owner panicked");
        claimed += own + stolen;
    }

    assert_eq!(claimed, total);
    for (i, count) in taken.iter().enumerate() {
        assert_eq!(count.load(Ordering::Relaxed), 1, "task {i}");
    }
    assert!(stealers.iter().all(|s| s.is_empty()));
}
