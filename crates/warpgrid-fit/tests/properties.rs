//! Invariants of the bitmap, port parser, resource algebra, fit verdicts,
//! scores and reschedule backoff, checked over small generated inputs.

use std::collections::BTreeSet;
use std::time::{Duration, UNIX_EPOCH};

use warpgrid_fit::*;

// ── Bitmap ────────────────────────────────────────────────────────

#[test]
fn bitmap_set_and_unset_are_local() {
    for size in [8, 64, 1024] {
        let mut b = Bitmap::new(size).unwrap();
        for i in (0..size).step_by(7) {
            b.set(i);
            assert!(b.check(i));
            assert_eq!(b.indexes(true).collect::<Vec<_>>(), vec![i]);
            b.unset(i);
            assert!(!b.check(i));
            assert_eq!(b.count_set(), 0);
        }
    }
}

// ── Port specs ────────────────────────────────────────────────────

#[test]
fn parsed_ports_are_sorted_unique_and_valid() {
    let specs = [
        "",
        "80",
        "443,80,443",
        "1-5,3-8",
        "65535",
        "100-110, 90 ,105",
        "1,65530-65535",
    ];
    for spec in specs {
        let ports = parse_port_ranges(spec).unwrap();
        assert!(ports.windows(2).all(|w| w[0] < w[1]), "{spec}: {ports:?}");
        assert!(ports.iter().all(|&p| p > 0), "{spec}");
    }
}

#[test]
fn malformed_specs_are_rejected() {
    for spec in ["0", "1-2-3", "a", "80,", "70000", "10-5", "1-99999999"] {
        assert!(parse_port_ranges(spec).is_err(), "{spec}");
    }
}

// ── Resource algebra ──────────────────────────────────────────────

fn cr(cpu: i64, cores: &[u16], mem: i64, mem_max: i64, disk: i64, mbits: u64) -> ComparableResources {
    ComparableResources {
        flattened: AllocatedTaskResources {
            cpu: AllocatedCpuResources {
                cpu_shares: cpu,
                reserved_cores: cores.iter().copied().collect(),
            },
            memory: AllocatedMemoryResources {
                memory_mb: mem,
                memory_max_mb: mem_max,
            },
            networks: if mbits > 0 {
                vec![NetworkResource::on_device("eth0", mbits)]
            } else {
                Vec::new()
            },
            devices: Vec::new(),
        },
        shared: AllocatedSharedResources {
            disk_mb: disk,
            ..Default::default()
        },
    }
}

fn samples() -> Vec<ComparableResources> {
    vec![
        cr(100, &[], 256, 0, 10, 0),
        cr(500, &[1], 512, 1024, 0, 100),
        cr(0, &[2, 3], 0, 0, 300, 50),
        cr(1200, &[1, 4], 2048, 4096, 1000, 0),
    ]
}

fn sum(items: &[&ComparableResources]) -> ComparableResources {
    let mut acc = ComparableResources::default();
    for item in items {
        acc.add(item);
    }
    acc
}

#[test]
fn addition_is_associative_and_commutative() {
    let s = samples();
    for a in &s {
        for b in &s {
            let mut ab = a.clone();
            ab.add(b);
            let mut ba = b.clone();
            ba.add(a);
            assert_eq!(ab, ba);

            for c in &s {
                let mut left = ab.clone();
                left.add(c);

                let mut bc = b.clone();
                bc.add(c);
                let mut right = a.clone();
                right.add(&bc);

                assert_eq!(left, right);
            }
        }
    }
}

#[test]
fn subtracting_self_leaves_nothing_used() {
    for a in samples() {
        let mut d = a.clone();
        d.subtract(&a);
        assert_eq!(d.flattened.cpu.cpu_shares, 0);
        assert!(d.flattened.cpu.reserved_cores.is_empty());
        assert_eq!(d.flattened.memory.memory_mb, 0);
        assert_eq!(d.flattened.memory.effective_max_mb(), 0);
        assert_eq!(d.shared.disk_mb, 0);
        assert!(d.flattened.networks.iter().all(|n| n.mbits == 0));
    }
}

#[test]
fn everything_covers_zero() {
    let zero = ComparableResources::default();
    for a in samples() {
        assert_eq!(a.superset(&zero), Ok(()));
    }
    assert_eq!(zero.superset(&zero), Ok(()));
}

#[test]
fn sum_covers_each_part() {
    let s = samples();
    let total = sum(&s.iter().collect::<Vec<_>>());
    for part in &s {
        assert_eq!(total.superset(part), Ok(()));
    }
}

// ── Fit verdicts ──────────────────────────────────────────────────

fn make_node() -> Node {
    Node {
        id: "n1".to_string(),
        resources: NodeResources {
            cpu_shares: 3000,
            reservable_cores: (0..4).collect(),
            memory_mb: 4096,
            disk_mb: 10000,
            networks: vec![NetworkResource::on_device("eth0", 1000)],
            ..Default::default()
        },
        ..Default::default()
    }
}

fn make_alloc(id: &str, cpu: i64, cores: &[u16], port: Option<(u16, &str)>, mbits: u64) -> Allocation {
    let mut alloc = Allocation {
        id: id.to_string(),
        client_status: ClientStatus::Running,
        ..Default::default()
    };
    alloc.allocated_resources.tasks.insert(
        "main".to_string(),
        AllocatedTaskResources {
            cpu: AllocatedCpuResources {
                cpu_shares: cpu,
                reserved_cores: cores.iter().copied().collect(),
            },
            memory: AllocatedMemoryResources {
                memory_mb: 512,
                memory_max_mb: 0,
            },
            ..Default::default()
        },
    );
    let mut network = NetworkResource::on_device("eth0", mbits);
    if let Some((value, host_network)) = port {
        network
            .reserved_ports
            .push(Port::new("p", value).on_host_network(host_network));
    }
    alloc.allocated_resources.shared.networks.push(network);
    alloc
}

/// Independent restatement of the fit conditions.
fn expected_to_fit(node: &Node, allocs: &[Allocation]) -> bool {
    let mut cores = BTreeSet::new();
    let mut ports = BTreeSet::new();
    let (mut cpu, mut mem, mut mbits) = (0, 0, 0);

    for a in allocs {
        let task = &a.allocated_resources.tasks["main"];
        for c in &task.cpu.reserved_cores {
            if !cores.insert(*c) || !node.resources.reservable_cores.contains(c) {
                return false;
            }
        }
        cpu += task.cpu.cpu_shares;
        mem += task.memory.memory_mb;
        for n in &a.allocated_resources.shared.networks {
            mbits += n.mbits;
            for p in &n.reserved_ports {
                if !ports.insert((p.host_network().to_string(), p.value)) {
                    return false;
                }
            }
        }
    }
    cpu <= node.resources.cpu_shares && mem <= node.resources.memory_mb && mbits <= 1000
}

#[test]
fn fit_verdict_matches_conditions() {
    let node = make_node();
    let pool: Vec<Allocation> = vec![
        make_alloc("a", 1000, &[0], Some((80, "default")), 300),
        make_alloc("b", 1000, &[1], Some((80, "public")), 300),
        make_alloc("c", 1000, &[0], None, 100),
        make_alloc("d", 500, &[], Some((80, "")), 500),
        make_alloc("e", 500, &[2, 3], Some((443, "default")), 0),
        make_alloc("f", 100, &[9], None, 0),
    ];

    // Every subset of the pool, in order.
    for mask in 0u32..(1 << pool.len()) {
        let allocs: Vec<Allocation> = pool
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, a)| a.clone())
            .collect();

        let out = allocs_fit(&node, &allocs, None, true);
        assert_eq!(
            out.fits(),
            expected_to_fit(&node, &allocs),
            "mask {mask:#b}: {}",
            out.dimension_str()
        );
        if !out.fits() {
            assert!(!out.dimension_str().is_empty());
        }
    }
}

// ── Scores ────────────────────────────────────────────────────────

#[test]
fn scores_are_bounded_and_monotonic() {
    let node = make_node();
    let mut last_bin_pack = f64::MIN;
    let mut last_spread = f64::MAX;

    for step in 0..=20 {
        let mut used = ComparableResources::default();
        used.flattened.cpu.cpu_shares = 3000 * step / 20;
        used.flattened.memory.memory_mb = 4096 * step / 20;

        let bin_pack = score_fit_bin_pack(&node, &used);
        let spread = score_fit_spread(&node, &used);
        assert!((0.0..=18.0).contains(&bin_pack));
        assert!((0.0..=18.0).contains(&spread));
        assert!(bin_pack >= last_bin_pack);
        assert!(spread <= last_spread);
        last_bin_pack = bin_pack;
        last_spread = spread;
    }
}

// ── Reschedule backoff ────────────────────────────────────────────

fn backoff(function: DelayFunction, n: usize) -> Vec<u64> {
    let policy = ReschedulePolicy {
        unlimited: true,
        delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(90),
        delay_function: function,
        ..Default::default()
    };
    let mut alloc = Allocation {
        client_status: ClientStatus::Failed,
        reschedule_policy: Some(policy),
        ..Default::default()
    };

    let mut now = UNIX_EPOCH + Duration::from_secs(1_000_000);
    let mut delays = Vec::new();
    for i in 0..n {
        alloc.id = format!("alloc-{i}");
        alloc.modify_time = Some(now);
        delays.push(alloc.next_delay(now).as_secs());

        alloc.reschedule_tracker = Some(RescheduleTracker::carry_over(&alloc, now));
        now += Duration::from_secs(2);
    }
    delays
}

#[test]
fn constant_policy_eligibility_by_attempts() {
    let t = UNIX_EPOCH + Duration::from_secs(1_000_000);
    let policy = ReschedulePolicy {
        attempts: 2,
        interval: Duration::from_secs(600),
        delay: Duration::from_secs(5),
        ..Default::default()
    };
    let event = |ago| RescheduleEvent {
        reschedule_time: t - Duration::from_secs(ago),
        prev_alloc_id: String::new(),
        prev_node_id: String::new(),
        delay: Duration::from_secs(5),
    };

    assert!(policy.next_reschedule_time(&[], t).1);
    assert!(!policy.next_reschedule_time(&[event(300), event(100)], t).1);
}

#[test]
fn exponential_backoff_sequence() {
    assert_eq!(
        backoff(DelayFunction::Exponential, 9),
        vec![5, 10, 20, 40, 80, 90, 90, 90, 90]
    );
}

#[test]
fn fibonacci_backoff_sequence() {
    assert_eq!(
        backoff(DelayFunction::Fibonacci, 10),
        vec![5, 5, 10, 15, 25, 40, 65, 90, 90, 90]
    );
}

#[test]
fn backoff_resets_after_long_run() {
    for function in [DelayFunction::Exponential, DelayFunction::Fibonacci] {
        let t = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let policy = ReschedulePolicy {
            unlimited: true,
            delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(90),
            delay_function: function,
            ..Default::default()
        };
        let events: Vec<RescheduleEvent> = [65u64, 90]
            .iter()
            .enumerate()
            .map(|(i, d)| RescheduleEvent {
                reschedule_time: t + Duration::from_secs(i as u64),
                prev_alloc_id: format!("p{i}"),
                prev_node_id: "n".to_string(),
                delay: Duration::from_secs(*d),
            })
            .collect();

        assert_eq!(
            policy.next_delay(&events, t + Duration::from_secs(30)),
            Duration::from_secs(90)
        );
        assert_eq!(
            policy.next_delay(&events, t + Duration::from_secs(500)),
            Duration::from_secs(5)
        );
    }
}
