//! End-to-end loading tests over small in-memory and on-disk dumps

use callscope_profile::{
    detect, Addr, CollectedDiagnostics, DumpFile, Loader, Part, ProfileError, ProfileGraph,
    Severity,
};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn load(text: &str) -> (ProfileGraph, Part, CollectedDiagnostics) {
    let mut graph = ProfileGraph::new();
    let mut part = Part::new("test.out");
    let mut diags = CollectedDiagnostics::default();
    Loader::new(&mut graph, &mut part)
        .with_diagnostics(&mut diags)
        .load_bytes("test.out", text.as_bytes())
        .expect("load should succeed");
    (graph, part, diags)
}

#[test]
fn test_self_cost() {
    let (graph, part, _) = load("events: Ir\nfl=a.c\nfn=f\n10 100\n");

    let file = graph.find_file("a.c").unwrap();
    let object = graph.find_object("???").unwrap();
    let f = graph.find_function("f", file, Some(object)).unwrap();
    let line = graph.find_line(f, file, 10).unwrap();

    assert_eq!(part.line_cost(line).unwrap().values(), &[100]);
    assert_eq!(part.function_cost(f).unwrap().values(), &[100]);
    assert_eq!(part.totals().values(), &[100]);
    assert!(part.is_sealed());
}

#[test]
fn test_compressed_references() {
    let (graph, part, _) = load("events: Ir\nfl=(1) a.c\nfn=(1) f\n10 100\nfn=(1)\n11 50\n");

    let file = graph.find_file("a.c").unwrap();
    let object = graph.find_object("???").unwrap();
    let f = graph.find_function("f", file, Some(object)).unwrap();
    assert_eq!(graph[f].lines.len(), 2);

    let line10 = graph.find_line(f, file, 10).unwrap();
    let line11 = graph.find_line(f, file, 11).unwrap();
    assert_eq!(part.line_cost(line10).unwrap().values(), &[100]);
    assert_eq!(part.line_cost(line11).unwrap().values(), &[50]);
    assert_eq!(part.totals().values(), &[150]);
}

#[test]
fn test_compressed_rebinding_wins() {
    let (graph, _, _) = load(
        "events: Ir\n\
         fl=(1) a.c\nfn=(2) f\n10 100\n\
         fl=(1) b.c\nfn=(2) g\n5 50\n",
    );

    let file_a = graph.find_file("a.c").unwrap();
    let file_b = graph.find_file("b.c").unwrap();
    let object = graph.find_object("???").unwrap();
    assert!(graph.find_function("f", file_a, Some(object)).is_some());
    assert!(graph.find_function("g", file_b, Some(object)).is_some());
}

#[test]
fn test_call_edge() {
    let (graph, part, _) =
        load("events: Ir\nob=libA\nfl=a.c\nfn=f\n10 100\ncfn=g\ncalls=3 20\n10 60\n");

    let object = graph.find_object("libA").unwrap();
    let file = graph.find_file("a.c").unwrap();
    let f = graph.find_function("f", file, Some(object)).unwrap();
    let g = graph.find_function("g", file, Some(object)).unwrap();
    let call = graph.find_call(f, g).unwrap();

    let record = part.call_cost(call).unwrap();
    assert_eq!(record.count, 3);
    assert_eq!(record.cost.values(), &[60]);

    let line = graph.find_line(f, file, 10).unwrap();
    let at_line = part.line_call_cost(call, line).unwrap();
    assert_eq!(at_line.count, 3);
    assert_eq!(at_line.cost.values(), &[60]);

    // the call cost is not part of f's self cost
    assert_eq!(part.line_cost(line).unwrap().values(), &[100]);
    assert_eq!(part.totals().values(), &[100]);
    assert_eq!(graph.call_max().values(), &[60]);
}

#[test]
fn test_address_range_with_instr_positions() {
    let (graph, part, _) = load(
        "events: Ir\npositions: instr line\nfl=a.c\nfn=f\n0x1000 10 5\n+4 * 5\n",
    );

    let file = graph.find_file("a.c").unwrap();
    let object = graph.find_object("???").unwrap();
    let f = graph.find_function("f", file, Some(object)).unwrap();

    let first = graph.find_instr(f, Addr(0x1000)).unwrap();
    let second = graph.find_instr(f, Addr(0x1004)).unwrap();
    assert_eq!(part.instr_cost(first).unwrap().values(), &[5]);
    assert_eq!(part.instr_cost(second).unwrap().values(), &[5]);

    // both instructions map to line 10
    let line = graph.find_line(f, file, 10).unwrap();
    assert_eq!(graph[first].line, Some(line));
    assert_eq!(graph[second].line, Some(line));
    assert_eq!(part.line_cost(line).unwrap().values(), &[10]);
}

#[test]
fn test_line_and_instr_sums_agree() {
    let (graph, part, _) = load(
        "events: Ir Dr\npositions: instr line\nfl=a.c\nfn=f\n\
         0x1000 10 5 1\n+4 * 5 1\n+8 12 7 2\n",
    );

    let file = graph.find_file("a.c").unwrap();
    let object = graph.find_object("???").unwrap();
    let f = graph.find_function("f", file, Some(object)).unwrap();

    let mut by_line = vec![0u64; 2];
    for (id, cost) in part.line_costs() {
        assert_eq!(graph[id].function, f);
        for (slot, &v) in cost.values().iter().enumerate() {
            by_line[slot] += v;
        }
    }
    let mut by_instr = vec![0u64; 2];
    for (id, cost) in part.instr_costs() {
        assert_eq!(graph[id].function, f);
        for (slot, &v) in cost.values().iter().enumerate() {
            by_instr[slot] += v;
        }
    }
    assert_eq!(by_line, by_instr);
    assert_eq!(by_line, vec![17, 4]);
}

#[test]
fn test_part_totals_sum_functions_without_summary() {
    let (graph, part, _) = load(
        "events: Ir\nfl=a.c\nfn=f\n10 100\nfn=g\n20 30\nfl=b.c\nfn=h\n5 7\n",
    );

    let mut sum = vec![0u64];
    for (_, cost) in part.function_costs() {
        for (slot, &v) in cost.values().iter().enumerate() {
            sum[slot] += v;
        }
    }
    assert_eq!(part.totals().values(), sum.as_slice());
    assert_eq!(part.totals().values(), &[137]);
    assert_eq!(graph.totals().values(), &[137]);
}

#[test]
fn test_summary_takes_precedence() {
    let (_, part, _) = load("events: Ir Dr\nsummary: 1000 2000\nfl=a.c\nfn=f\n10 100 5\n");
    assert_eq!(part.totals().values(), &[1000, 2000]);
}

#[test]
fn test_missing_events_is_fatal() {
    let mut graph = ProfileGraph::new();
    let mut part = Part::new("broken.out");
    let err = Loader::new(&mut graph, &mut part)
        .load_bytes("broken.out", b"fl=a.c\nfn=f\n10 100\n")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ProfileError>(),
        Some(ProfileError::MissingEventHeader { line: 3, .. })
    ));
}

#[test]
fn test_summary_before_events_is_fatal() {
    let mut graph = ProfileGraph::new();
    let mut part = Part::new("broken.out");
    let err = Loader::new(&mut graph, &mut part)
        .load_bytes("broken.out", b"summary: 100\n")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ProfileError>(),
        Some(ProfileError::MissingEventHeader { .. })
    ));
}

#[test]
fn test_cond_jump() {
    let (graph, part, _) = load("events: Ir\nfl=a.c\nfn=f\n15 100\njcnd=7/10 20\n*\n");

    assert_eq!(graph.jumps().len(), 1);
    let jump = &graph.jumps()[0];
    assert!(jump.conditional);
    assert_eq!(jump.from_line, 15);
    assert_eq!(jump.to_line, 20);
    assert_eq!(jump.from, jump.to);

    let (id, cost) = part.jump_costs().next().unwrap();
    assert_eq!(graph[id].from_line, 15);
    assert_eq!(cost.followed, 7);
    assert_eq!(cost.executed, 10);
}

#[test]
fn test_plain_jump_to_other_function() {
    let (graph, part, _) = load(
        "events: Ir\nfl=a.c\nfn=f\n10 100\njfi=b.c\njfn=g\njump=5 7\n11\n",
    );

    let jump = &graph.jumps()[0];
    assert!(!jump.conditional);
    assert_eq!(jump.from_line, 11);
    assert_eq!(jump.to_line, 7);

    let file_b = graph.find_file("b.c").unwrap();
    assert_eq!(graph[jump.to].name.as_ref(), "g");
    assert_eq!(graph[jump.to].file, file_b);

    let (_, cost) = part.jump_costs().next().unwrap();
    assert_eq!(cost.executed, 5);
    assert_eq!(cost.followed, 0);
}

#[test]
fn test_negative_line_delta_clamps_and_warns() {
    let (graph, part, diags) = load("events: Ir\nfl=a.c\nfn=f\n10 100\n-15 50\n");

    let file = graph.find_file("a.c").unwrap();
    let object = graph.find_object("???").unwrap();
    let f = graph.find_function("f", file, Some(object)).unwrap();
    let clamped = graph.find_line(f, file, 0).unwrap();
    assert_eq!(part.line_cost(clamped).unwrap().values(), &[50]);
    assert!(diags
        .warnings()
        .any(|d| d.message.contains("clamped") && d.line == 5));
}

#[test]
fn test_missing_context_synthesises_dummies() {
    let (graph, part, diags) = load("events: Ir\n10 100\n");

    let file = graph.find_file("???").unwrap();
    let object = graph.find_object("???").unwrap();
    let f = graph.find_function("???", file, Some(object)).unwrap();
    let line = graph.find_line(f, file, 10).unwrap();
    assert_eq!(part.line_cost(line).unwrap().values(), &[100]);
    // one warning each for function, file, and object
    assert!(diags.warnings().count() >= 3);
    assert!(diags.warnings().all(|d| d.line == 2));
}

#[test]
fn test_unbound_compression_reference_is_an_error() {
    let (graph, _, diags) = load("events: Ir\nfl=(5)\nfn=f\n10 100\n");

    assert!(diags
        .errors()
        .any(|d| d.message.contains("compressed file index 5")));
    // the load continued with a dummy file
    assert!(graph.find_file("???").is_some());
}

#[test]
fn test_object_mismatch_keeps_first_binding() {
    let (graph, _, diags) = load(
        "events: Ir\nob=A\nfl=f.c\nfn=(1) f\n10 1\nob=B\nfl=f.c\nfn=(1)\n11 1\n",
    );

    let a = graph.find_object("A").unwrap();
    let file = graph.find_file("f.c").unwrap();
    let f = graph.find_function("f", file, Some(a)).unwrap();
    assert_eq!(graph[f].object, Some(a));
    assert!(diags.warnings().any(|d| d.message.contains("object mismatch")));
}

#[test]
fn test_rcalls_is_deprecated_alias() {
    let (graph, part, diags) = load(
        "events: Ir\nfl=a.c\nfn=f\n10 100\ncfn=g\nrcalls=2\n10 40\n",
    );

    let file = graph.find_file("a.c").unwrap();
    let object = graph.find_object("???").unwrap();
    let f = graph.find_function("f", file, Some(object)).unwrap();
    let g = graph.find_function("g", file, Some(object)).unwrap();
    let call = graph.find_call(f, g).unwrap();
    assert_eq!(part.call_cost(call).unwrap().count, 2);
    assert!(diags.warnings().any(|d| d.message.contains("deprecated")));
}

#[test]
fn test_part_metadata() {
    let (graph, part, _) = load(
        "version: 1\n\
         creator: callgrind-3.22.0\n\
         pid: 1234\n\
         part: 2\n\
         thread: 3\n\
         timeframe (BB): 0+100\n\
         desc: Trigger: Program termination\n\
         cmd: ls -l\n\
         events: Ir\n\
         fl=a.c\nfn=f\n10 100\n",
    );

    assert_eq!(part.meta.version.as_deref(), Some("1"));
    assert_eq!(part.meta.creator.as_deref(), Some("callgrind-3.22.0"));
    assert_eq!(part.meta.pid, Some(1234));
    assert_eq!(part.meta.part_number, Some(2));
    assert_eq!(part.meta.thread, Some(3));
    assert_eq!(part.meta.timeframe.as_deref(), Some("0+100"));
    assert_eq!(part.meta.trigger.as_deref(), Some("Program termination"));
    assert_eq!(graph.command(), Some("ls -l"));
}

#[test]
fn test_redefined_command_warns() {
    let (graph, _, diags) = load("events: Ir\ncmd: ls -l\ncmd: other\n");
    assert_eq!(graph.command(), Some("other"));
    assert!(diags
        .warnings()
        .any(|d| d.message.contains("redefined command")));
}

#[test]
fn test_event_type_registry() {
    let (graph, _, _) = load(
        "event: Ir : Instruction Fetch\n\
         event: CEst = Ir + 10 Bm : Cycle Estimation\n\
         events: Ir\n",
    );

    let ir = graph.events.lookup("Ir").unwrap();
    assert_eq!(graph.events.get(ir).long_name, "Instruction Fetch");

    let cest = graph.events.lookup("CEst").unwrap();
    assert_eq!(graph.events.get(cest).long_name, "Cycle Estimation");
    assert_eq!(graph.events.get(cest).formula.as_deref(), Some("Ir + 10 Bm"));
}

#[test]
fn test_events_order_maps_across_parts() {
    let mut graph = ProfileGraph::new();

    let mut first = Part::new("a.out");
    Loader::new(&mut graph, &mut first)
        .load_bytes("a.out", b"events: Ir Dr\nfl=a.c\nfn=f\n10 1 2\n")
        .unwrap();

    let mut second = Part::new("b.out");
    Loader::new(&mut graph, &mut second)
        .load_bytes("b.out", b"events: Dr Ir\nfl=a.c\nfn=f\n10 20 10\n")
        .unwrap();

    let ir = graph.events.lookup("Ir").unwrap();
    let dr = graph.events.lookup("Dr").unwrap();
    assert_eq!(graph.totals().get(ir), 11);
    assert_eq!(graph.totals().get(dr), 22);
}

#[test]
fn test_call_max_is_idempotent_across_reloads() {
    let text = "events: Ir\nob=libA\nfl=a.c\nfn=f\n10 100\ncfn=g\ncalls=3 20\n10 60\n\
                cfn=g\ncalls=1 20\n10 9\n";

    let (first, _, _) = load(text);
    let (second, _, _) = load(text);
    assert_eq!(first.call_max().values(), second.call_max().values());
    assert_eq!(first.call_max().values(), &[69]);
}

#[test]
fn test_progress_reaches_completion() {
    let mut graph = ProfileGraph::new();
    let mut part = Part::new("test.out");
    let mut seen = Vec::new();
    Loader::new(&mut graph, &mut part)
        .with_progress(|pct| seen.push(pct))
        .load_bytes("test.out", b"events: Ir\nfl=a.c\nfn=f\n10 100\n")
        .unwrap();

    assert_eq!(seen.first(), Some(&0));
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_cancellation() {
    let mut graph = ProfileGraph::new();
    let mut part = Part::new("test.out");
    let flag = Arc::new(AtomicBool::new(false));
    flag.store(true, Ordering::Relaxed);

    let err = Loader::new(&mut graph, &mut part)
        .with_cancel(flag)
        .load_bytes("test.out", b"events: Ir\nfl=a.c\nfn=f\n10 100\n")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ProfileError>(),
        Some(ProfileError::Cancelled)
    ));
}

#[test]
fn test_detection() {
    assert!(detect(b"events: Ir\n"));
    assert!(detect(b"version: 1\ncreator: x\nevents: Ir Dr\n"));
    assert!(!detect(b"some other file\n"));
}

#[test]
fn test_load_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"events: Ir\nfl=a.c\nfn=f\n10 100\n").unwrap();
    file.flush().unwrap();

    let dump = DumpFile::open(file.path()).unwrap();
    assert!(dump.is_recognized());

    let mut graph = ProfileGraph::new();
    let mut part = Part::new(dump.name());
    let mut diags = CollectedDiagnostics::default();
    Loader::new(&mut graph, &mut part)
        .with_diagnostics(&mut diags)
        .load_file(&dump)
        .unwrap();
    assert_eq!(part.totals().values(), &[100]);
    assert!(diags.errors().next().is_none());
}

#[test]
fn test_missing_file_is_an_io_error() {
    let err = DumpFile::open("/nonexistent/profile.out").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ProfileError>(),
        Some(ProfileError::Io(_))
    ));
}

#[test]
fn test_diagnostics_carry_severity() {
    let (_, _, diags) = load("events: Ir\nfl=(9)\nfn=f\n10 100\nbogus line\n");
    assert!(diags.iter().any(|d| d.severity == Severity::Error));
    assert!(diags.iter().any(|d| d.severity == Severity::Warning));
    assert!(diags.iter().all(|d| d.dump == "test.out"));
}
