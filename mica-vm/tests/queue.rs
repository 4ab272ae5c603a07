//! The shared region and the Michael–Scott queue, driven through the
//! machine API over real emulated memory.

use mica_asm::Image;
use mica_types::Word;
use mica_vm::consts::SHARED_SPACE_START;
use mica_vm::{Machine, MachineConfig};

fn machine() -> Machine {
    // a single nop is enough; the queue tests never step the CPU
    let image = Image::from(vec![0]);
    let config = MachineConfig {
        memory_mb: 32,
        ..MachineConfig::default()
    };
    Machine::boot(&image, config, &[]).unwrap()
}

#[test]
fn shared_allocations_bump_by_whole_words() {
    let mut m = machine();

    let a = m.shared_alloc(8);
    let b = m.shared_alloc(5);
    let c = m.shared_alloc(4);

    assert_eq!(a, SHARED_SPACE_START);
    assert_eq!(b, a + 8);
    assert_eq!(c, b + 8, "5 bytes round up to 8");
}

#[test]
fn fifo_order_and_empty_signalling() {
    let mut m = machine();
    let q = m.queue_create().unwrap();

    m.queue_enqueue(q, 10).unwrap();
    m.queue_enqueue(q, 20).unwrap();
    m.queue_enqueue(q, 30).unwrap();

    let mut out: Word = -1;
    assert!(m.queue_dequeue(q, &mut out).unwrap());
    assert_eq!(out, 10);
    assert!(m.queue_dequeue(q, &mut out).unwrap());
    assert_eq!(out, 20);
    assert!(m.queue_dequeue(q, &mut out).unwrap());
    assert_eq!(out, 30);

    // the empty dequeue reports false and must not touch the slot
    out = 77;
    assert!(!m.queue_dequeue(q, &mut out).unwrap());
    assert_eq!(out, 77);
}

#[test]
fn queue_survives_interleaving() {
    let mut m = machine();
    let q = m.queue_create().unwrap();

    let mut expected = std::collections::VecDeque::new();
    let mut out: Word = 0;

    for round in 0..50 {
        m.queue_enqueue(q, round).unwrap();
        expected.push_back(round);
        m.queue_enqueue(q, round * 100).unwrap();
        expected.push_back(round * 100);

        assert!(m.queue_dequeue(q, &mut out).unwrap());
        assert_eq!(Some(out), expected.pop_front());
    }

    while let Some(want) = expected.pop_front() {
        assert!(m.queue_dequeue(q, &mut out).unwrap());
        assert_eq!(out, want);
    }
    assert!(!m.queue_dequeue(q, &mut out).unwrap());
}

#[test]
fn madvise_returns_one_queue_for_everyone() {
    let mut m = machine();

    let q1 = m.shared_queue().unwrap();
    let q2 = m.shared_queue().unwrap();

    assert_eq!(q1, q2);
    assert!(q1 >= SHARED_SPACE_START);
}
