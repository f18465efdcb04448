// SIMPLE-THERMAL EVENT LOG
// RECORDS EVERY DECIDED TICK (SMOOTHED TEMPERATURE + SELECTED ZONE)
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION WHILE THE LOOP RUNS.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use std::collections::BTreeMap;

use crate::zone::{zone_label, ZoneIndex};

const MAX_SNAPSHOTS: usize = 8192;

#[derive(Clone, Copy)]
pub struct Snapshot {
    pub ts_ns:    u64,
    pub avg_temp: i32,
    pub zone:     Option<ZoneIndex>,
    pub changed:  bool,
}

pub struct EventLog {
    snapshots: Vec<Snapshot>,
    head:      usize,
    len:       usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![
                Snapshot { ts_ns: 0, avg_temp: 0, zone: None, changed: false };
                MAX_SNAPSHOTS
            ],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // RECORD ONE DECIDED TICK. OVERWRITES OLDEST ENTRY WHEN FULL.
    pub fn snapshot(&mut self, avg_temp: i32, zone: Option<ZoneIndex>, changed: bool) {
        self.snapshots[self.head] = Snapshot {
            ts_ns: now_ns(),
            avg_temp,
            zone,
            changed,
        };
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    pub fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.snapshots[(start + i) % MAX_SNAPSHOTS]
        })
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let Some(first) = iter.next() else {
            return;
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<10} {:<6} {:<6}", "TIME_S", "AVG_TEMP", "ZONE", "CHANGE");
        println!("{}", "-".repeat(36));

        for s in std::iter::once(first).chain(iter) {
            let elapsed_s = s.ts_ns.saturating_sub(base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.1} {:<10} {:<6} {:<6}",
                elapsed_s, s.avg_temp, zone_label(s.zone),
                if s.changed { "*" } else { "" });
        }

        if self.len == MAX_SNAPSHOTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} SNAPSHOTS)", MAX_SNAPSHOTS);
        }
        println!("TOTAL SNAPSHOTS: {}", self.len);
    }

    // TICKS SPENT IN EACH ZONE ("none" INCLUDED)
    pub fn zone_histogram(&self) -> BTreeMap<Option<ZoneIndex>, u64> {
        let mut hist = BTreeMap::new();
        for s in self.iter_chronological() {
            *hist.entry(s.zone).or_insert(0) += 1;
        }
        hist
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }

        let snapshots: Vec<&Snapshot> = self.iter_chronological().collect();

        let transitions = snapshots.iter().filter(|s| s.changed).count();
        let peak = snapshots.iter().map(|s| s.avg_temp).max().unwrap_or(0);
        let low = snapshots.iter().map(|s| s.avg_temp).min().unwrap_or(0);

        let elapsed_ns = match (snapshots.first(), snapshots.last()) {
            (Some(f), Some(l)) => l.ts_ns.saturating_sub(f.ts_ns),
            _ => 0,
        };
        let elapsed_s = elapsed_ns as f64 / 1_000_000_000.0;

        println!("\n{}", "=".repeat(50));
        println!("SIMPLE-THERMAL SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  DECIDED TICKS:     {}", self.len);
        println!("  ZONE TRANSITIONS:  {}", transitions);
        println!("  PEAK AVG TEMP:     {}", peak);
        println!("  LOWEST AVG TEMP:   {}", low);
        for (zone, ticks) in self.zone_histogram() {
            let pct = ticks as f64 / self.len as f64 * 100.0;
            println!("  ZONE {:<6}        {:.1}%", zone_label(zone), pct);
        }
        println!("  ELAPSED:           {:.1}s", elapsed_s);
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::{ClusterCeilings, ZoneDefinition, ZoneTable};

    fn table() -> ZoneTable {
        let z = |trip| ZoneDefinition {
            ceilings: ClusterCeilings { little_khz: 1, big_khz: 1, prime_khz: 1 },
            trip_temp: trip,
        };
        ZoneTable::new(vec![z(40), z(50)]).unwrap()
    }

    #[test]
    fn snapshot_records() {
        let t = table();
        let mut log = EventLog::new();
        assert_eq!(log.len, 0);

        log.snapshot(45, t.index(0), true);
        assert_eq!(log.len, 1);
        assert_eq!(log.snapshots[0].avg_temp, 45);
        assert_eq!(log.snapshots[0].zone, t.index(0));
        assert!(log.snapshots[0].changed);
        assert!(log.snapshots[0].ts_ns > 0);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut log = EventLog::new();

        // FILL TO CAPACITY
        for i in 0..MAX_SNAPSHOTS {
            log.snapshot(i as i32, None, false);
        }
        assert_eq!(log.len, MAX_SNAPSHOTS);
        assert_eq!(log.head, 0); // WRAPPED BACK TO START

        // WRITE ONE MORE -- OVERWRITES OLDEST
        log.snapshot(9999, None, false);
        assert_eq!(log.len, MAX_SNAPSHOTS);
        assert_eq!(log.head, 1);
        assert_eq!(log.snapshots[0].avg_temp, 9999);

        // CHRONOLOGICAL ITERATION STARTS FROM OLDEST (INDEX 1)
        let ordered: Vec<i32> = log.iter_chronological()
            .map(|s| s.avg_temp)
            .collect();
        assert_eq!(ordered[0], 1); // OLDEST SURVIVING ENTRY
        assert_eq!(ordered.last().copied(), Some(9999)); // NEWEST
        assert_eq!(ordered.len(), MAX_SNAPSHOTS);
    }

    #[test]
    fn zone_histogram_counts_none() {
        let t = table();
        let mut log = EventLog::new();
        log.snapshot(30, None, false);
        log.snapshot(41, t.index(0), true);
        log.snapshot(42, t.index(0), false);
        let hist = log.zone_histogram();
        assert_eq!(hist.get(&None), Some(&1));
        assert_eq!(hist.get(&t.index(0)), Some(&2));
    }

    #[test]
    fn summary_no_panic_empty() {
        let log = EventLog::new();
        log.summary(); // SHOULD NOT PANIC WITH 0 SNAPSHOTS
        log.dump();
    }

    #[test]
    fn dump_no_panic() {
        let t = table();
        let mut log = EventLog::new();
        log.snapshot(39, None, false);
        log.snapshot(51, t.index(1), true);
        log.dump(); // SHOULD NOT PANIC
        log.summary();
    }
}
