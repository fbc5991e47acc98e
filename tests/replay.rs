#[path = "common/mod.rs"]
mod common;

use common::{assert_snapshot, load_trace, replay};
use vmtrack::replay::{parse_trace, Replayer};
use vmtrack::{MemTag, Scale, SpaceId, State, TrackerConfig};

fn report(replayer: &Replayer, detail: bool) -> String {
    let mut out = String::new();
    replayer
        .tracker()
        .report(&mut out, replayer.tags(), Scale::KiB, detail)
        .expect("write report");
    out
}

#[test]
fn basic_trace_summary_matches_snapshot() {
    let replayer = replay("basic.trace", TrackerConfig::detail());
    assert_snapshot("reports/basic_summary.txt", &report(&replayer, false));
}

#[test]
fn basic_trace_stats() {
    let replayer = replay("basic.trace", TrackerConfig::detail());
    let stats = replayer.stats();
    assert_eq!(stats.records, 6);
    assert_eq!(stats.spaces, 1);
    assert_eq!(stats.operations, 5);
    assert_eq!(stats.dropped, 0);
    assert_eq!(replayer.space_id("gpu"), Some(SpaceId::new(1)));
}

#[test]
fn basic_trace_regions() {
    let replayer = replay("basic.trace", TrackerConfig::detail());
    let gpu = replayer.space_id("gpu").unwrap();
    let heap = replayer.tags().tag_of("heap").unwrap();

    replayer.tracker().with_view(|view| {
        assert_eq!(view.state_at(0x10800), State::Committed);
        assert_eq!(view.state_at(0x11000), State::Reserved);
        assert_eq!(view.state_at(0x14000), State::Released);

        let lookup = view.find_region(0x80010).expect("mapped region");
        let mapping = lookup.interval.data.mapping.expect("mapping");
        assert_eq!(mapping.space, gpu);
        assert_eq!(mapping.offset_of(0x80010), 0x10);

        let recomputed = view.recompute_summary(SpaceId::PROCESS).unwrap();
        assert_eq!(recomputed.get(heap).reserve, 0x3000);
        assert_eq!(recomputed.get(heap).commit, 0x1000);
    });
}

#[test]
fn detail_report_lists_mapping_and_stacks() {
    let text = "reserve process 0x10000 0x4000 heap 0x4010 0x4200\n\
                commit process 0x10000 0x1000 heap 0x4010 0x4300\n";
    let mut replayer = Replayer::new(TrackerConfig::detail());
    replayer.run(&parse_trace(text).unwrap()).unwrap();

    let out = report(&replayer, true);
    assert!(out.contains("reserved 16KB for heap"), "{}", out);
    assert!(out.contains("committed 4KB"), "{}", out);
    assert!(out.contains("0x0000000000004200"), "{}", out);
    assert!(out.contains("0x0000000000004300"), "{}", out);
}

#[test]
fn summary_level_report_omits_stacks() {
    let text = "reserve process 0x10000 0x4000 heap 0x4010 0x4200\n";
    let mut replayer = Replayer::new(TrackerConfig::summary());
    replayer.run(&parse_trace(text).unwrap()).unwrap();

    let out = report(&replayer, true);
    assert!(out.contains("reserved 16KB for heap"), "{}", out);
    assert!(!out.contains("0x0000000000004200"), "{}", out);
}

#[test]
fn summary_level_detail_matches_snapshot() {
    let text = "reserve process 0x10000 0x4000 heap 0x4010\n\
                commit process 0x10000 0x1000 heap 0x4020\n";
    let mut replayer = Replayer::new(TrackerConfig::summary());
    replayer.run(&parse_trace(text).unwrap()).unwrap();

    let out = report(&replayer, true);
    assert!(out.contains("[0x0000000000010000 - 0x0000000000014000]"), "{}", out);
    assert_snapshot("reports/summary_level_detail.txt", &out);
}

#[test]
fn reports_are_identical_across_runs_and_seeds() {
    let records = load_trace("growth.trace");
    let digest = |seed: u64| {
        let mut replayer = Replayer::new(TrackerConfig::detail().with_seed(seed));
        replayer.run(&records).unwrap();
        blake3::hash(report(&replayer, true).as_bytes())
    };

    let reference = digest(1234);
    for seed in [1234, 1, 42, u64::MAX] {
        assert_eq!(digest(seed), reference, "seed {}", seed);
    }
}

#[test]
fn diff_of_growth_against_basic() {
    let baseline = replay("basic.trace", TrackerConfig::summary());
    let baseline_snapshot = baseline.snapshot();
    let (_, tags) = baseline.into_parts();

    let mut current = Replayer::with_tags(TrackerConfig::summary(), tags);
    current.run(&load_trace("growth.trace")).unwrap();

    let heap = current.tags().tag_of("heap").unwrap();
    let textures = current.tags().tag_of("textures").unwrap();
    let gpu = current.space_id("gpu").unwrap();

    let changes = current.snapshot().compare(&baseline_snapshot);
    assert_eq!(changes.len(), 2);
    let (id, process) = &changes[0];
    assert_eq!(*id, SpaceId::PROCESS);
    assert_eq!(process.get(heap).reserve, 0x8000);
    assert_eq!(process.get(heap).commit, 0x4000);
    assert!(process.get(MemTag::new(3)).is_zero());
    let (id, device) = &changes[1];
    assert_eq!(*id, gpu);
    assert_eq!(device.get(textures).commit, -0x1000);

    let mut out = String::new();
    current
        .snapshot()
        .render_diff(&mut out, &baseline_snapshot, current.tags(), Scale::KiB)
        .unwrap();
    assert!(
        out.contains("space#0 process: reserved=56KB +32KB committed=20KB +16KB"),
        "{}",
        out
    );
    assert!(out.contains("heap             reserved=44KB +32KB committed=20KB +16KB"), "{}", out);
    assert!(out.contains("space#1 gpu: reserved=0KB +0KB committed=4KB -4KB"), "{}", out);
    assert!(!out.contains("Dropped updates"), "{}", out);
}

#[test]
fn replay_stops_at_first_bad_record() {
    let text = "reserve process 0x1000 0x1000 heap\n\
                release nowhere 0x1000 0x1000\n\
                reserve process 0x3000 0x1000 heap\n";
    let mut replayer = Replayer::new(TrackerConfig::detail());
    let err = replayer.run(&parse_trace(text).unwrap()).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("trace record 2"), "{}", message);
    assert!(message.contains("unknown space 'nowhere'"), "{}", message);

    replayer.tracker().with_view(|view| {
        assert_eq!(view.state_at(0x1000), State::Reserved);
        assert_eq!(view.state_at(0x3000), State::Released);
    });
}

#[test]
fn parse_errors_carry_line_numbers() {
    let err = parse_trace("# header\nreserve process 0x1000\n").unwrap_err();
    assert!(format!("{:#}", err).contains("trace line 2"));
}
