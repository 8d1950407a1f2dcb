// tests/test_pipeline.rs — graph validation and scheduling order.
//
// Everything here is pure host logic: building graphs, wiring them, and
// checking what init() accepts, rejects, and schedules. Nothing touches a
// GPU, so this suite always runs in CI.

use visionflow::error::Error;
use visionflow::matrix::Matrix;
use visionflow::media::BufferMedia;
use visionflow::nodes;
use visionflow::pipeline::Pipeline;

fn grey_media(w: u32, h: u32) -> Box<BufferMedia> {
    Box::new(BufferMedia::uniform(w, h, [100, 100, 100, 255]))
}

// ===== Wiring validity =====

#[test]
fn valid_linear_graph_initializes() {
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(grey_media(32, 32)).named("source")).unwrap();
    let grey = p.add(nodes::image::greyscale().named("grey")).unwrap();
    let detector = p
        .add(nodes::keypoint::detector::fast(Default::default()).named("fast"))
        .unwrap();
    let sink = p.add(nodes::keypoint::sink().named("sink")).unwrap();

    p.connect(source.output("out"), grey.input("in")).unwrap();
    p.connect(grey.output("out"), detector.input("in")).unwrap();
    p.connect(detector.output("out"), sink.input("in")).unwrap();

    p.init().unwrap();
    assert_eq!(
        p.execution_order().unwrap(),
        vec!["source", "grey", "fast", "sink"]
    );
}

#[test]
fn type_mismatch_rejected_at_wiring_time() {
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(grey_media(8, 8))).unwrap();
    let sink = p.add(nodes::keypoint::sink()).unwrap();

    // Image output into a Keypoints input: refused synchronously.
    let err = p.connect(source.output("out"), sink.input("in")).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch(_)), "got {err:?}");
}

#[test]
fn unknown_port_names_rejected() {
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(grey_media(8, 8))).unwrap();
    let sink = p.add(nodes::image::sink()).unwrap();

    let err = p
        .connect(source.output("nope"), sink.input("in"))
        .unwrap_err();
    assert!(matches!(err, Error::IllegalOperation(_)));
}

#[test]
fn double_wired_input_rejected() {
    let mut p = Pipeline::new();
    let a = p.add(nodes::image::source(grey_media(8, 8))).unwrap();
    let b = p.add(nodes::image::source(grey_media(8, 8))).unwrap();
    let sink = p.add(nodes::image::sink()).unwrap();

    p.connect(a.output("out"), sink.input("in")).unwrap();
    let err = p.connect(b.output("out"), sink.input("in")).unwrap_err();
    assert!(matches!(err, Error::PortAlreadyConnected(_)));
}

#[test]
fn unconnected_input_rejected_at_init() {
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(grey_media(8, 8))).unwrap();
    let grey = p.add(nodes::image::greyscale().named("floating")).unwrap();
    let sink = p.add(nodes::image::sink()).unwrap();

    // grey's input is left dangling.
    let _ = grey;
    p.connect(source.output("out"), sink.input("in")).unwrap();

    let err = p.init().unwrap_err();
    match err {
        Error::UnconnectedInput(what) => assert_eq!(what, "floating.in"),
        other => panic!("expected UnconnectedInput, got {other:?}"),
    }
}

#[test]
fn cycle_rejected_at_init() {
    let mut p = Pipeline::new();
    // A keypoint loop: mixer -> clipper -> mixer, fed by a portal source
    // so every input is wired and only the cycle is at fault.
    let (_, handle) = nodes::keypoint::portal_sink();
    let feed = p.add(nodes::keypoint::portal_source(&handle)).unwrap();
    let mixer = p.add(nodes::keypoint::mixer()).unwrap();
    let clip = p.add(nodes::keypoint::clipper(10)).unwrap();
    let sink = p.add(nodes::keypoint::sink()).unwrap();

    p.connect(feed.output("out"), mixer.input("in1")).unwrap();
    p.connect(mixer.output("out"), clip.input("in")).unwrap();
    p.connect(clip.output("out"), mixer.input("in0")).unwrap();
    p.connect(mixer.output("out"), sink.input("in")).unwrap();

    let err = p.init().unwrap_err();
    assert!(matches!(err, Error::Cycle(_)), "got {err:?}");
}

#[test]
fn sink_count_enforced() {
    // No sink at all.
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(grey_media(8, 8))).unwrap();
    let grey = p.add(nodes::image::greyscale()).unwrap();
    p.connect(source.output("out"), grey.input("in")).unwrap();
    assert!(matches!(p.init().unwrap_err(), Error::NoSink));

    // Two sinks.
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(grey_media(8, 8))).unwrap();
    let s1 = p.add(nodes::image::sink().named("first")).unwrap();
    let s2 = p.add(nodes::image::sink().named("second")).unwrap();
    p.connect(source.output("out"), s1.input("in")).unwrap();
    p.connect(source.output("out"), s2.input("in")).unwrap();
    match p.init().unwrap_err() {
        Error::MultipleSinks(a, b) => {
            assert_eq!((a.as_str(), b.as_str()), ("first", "second"));
        }
        other => panic!("expected MultipleSinks, got {other:?}"),
    }
}

#[test]
fn duplicate_node_name_rejected_at_add() {
    let mut p = Pipeline::new();
    p.add(nodes::image::greyscale().named("twin")).unwrap();
    let err = p.add(nodes::image::sink().named("twin")).unwrap_err();
    assert!(matches!(err, Error::DuplicateNodeName(name) if name == "twin"));
}

// ===== Scheduling order =====

#[test]
fn every_node_scheduled_exactly_once_after_predecessors() {
    // Diamond: source -> grey -> {fast, harris} -> mixer -> sink.
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(grey_media(16, 16)).named("source")).unwrap();
    let grey = p.add(nodes::image::greyscale().named("grey")).unwrap();
    let fast = p
        .add(nodes::keypoint::detector::fast(Default::default()).named("fast"))
        .unwrap();
    let harris = p
        .add(nodes::keypoint::detector::harris(Default::default()).named("harris"))
        .unwrap();
    let mixer = p.add(nodes::keypoint::mixer().named("mixer")).unwrap();
    let sink = p.add(nodes::keypoint::sink().named("sink")).unwrap();

    p.connect(source.output("out"), grey.input("in")).unwrap();
    p.connect(grey.output("out"), fast.input("in")).unwrap();
    p.connect(grey.output("out"), harris.input("in")).unwrap();
    p.connect(fast.output("out"), mixer.input("in0")).unwrap();
    p.connect(harris.output("out"), mixer.input("in1")).unwrap();
    p.connect(mixer.output("out"), sink.input("in")).unwrap();
    p.init().unwrap();

    let order = p.execution_order().unwrap();
    assert_eq!(order.len(), 6, "each node exactly once");

    let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
    assert!(pos("source") < pos("grey"));
    assert!(pos("grey") < pos("fast"));
    assert!(pos("grey") < pos("harris"));
    assert!(pos("fast") < pos("mixer"));
    assert!(pos("harris") < pos("mixer"));
    assert_eq!(pos("sink"), 5, "sink runs last");

    // Tie-break between the two ready detectors: insertion order.
    assert!(pos("fast") < pos("harris"));
}

#[test]
fn sink_added_first_still_runs_last() {
    let mut p = Pipeline::new();
    let sink = p.add(nodes::image::sink().named("sink")).unwrap();
    let source = p.add(nodes::image::source(grey_media(8, 8)).named("source")).unwrap();
    p.connect(source.output("out"), sink.input("in")).unwrap();
    p.init().unwrap();
    assert_eq!(p.execution_order().unwrap(), vec!["source", "sink"]);
}

#[test]
fn sourceless_nodes_schedule_first() {
    // Two independent inputs into a keypoint mixer: both portal sources
    // (no inputs) must precede every consumer.
    let (_sink_node, handle) = nodes::keypoint::portal_sink();
    let mut p = Pipeline::new();
    let mux_a = p.add(nodes::keypoint::portal_source(&handle).named("a")).unwrap();
    let mux_b = p.add(nodes::keypoint::portal_source(&handle).named("b")).unwrap();
    let mixer = p.add(nodes::keypoint::mixer().named("mixer")).unwrap();
    let sink = p.add(nodes::keypoint::sink().named("sink")).unwrap();

    p.connect(mux_a.output("out"), mixer.input("in0")).unwrap();
    p.connect(mux_b.output("out"), mixer.input("in1")).unwrap();
    p.connect(mixer.output("out"), sink.input("in")).unwrap();
    p.init().unwrap();

    let order = p.execution_order().unwrap();
    assert_eq!(&order[..2], &["a", "b"]);
    assert_eq!(&order[2..], &["mixer", "sink"]);
}

// ===== Factory preconditions =====

#[test]
#[should_panic(expected = "3x3")]
fn transformer_insists_on_3x3() {
    let _ = nodes::keypoint::transformer(Matrix::<f32>::new(2, 2));
}

#[test]
#[should_panic(expected = "selects input 0 or 1")]
fn multiplexer_select_bounds() {
    let _ = nodes::keypoint::multiplexer(2);
}

#[test]
#[should_panic(expected = "portal")]
fn portal_kinds_cannot_cross() {
    let (_, image_handle) = nodes::image::portal_sink();
    let _ = nodes::keypoint::portal_source(&image_handle);
}

#[test]
fn rewiring_invalidates_init() {
    let mut p = Pipeline::new();
    let source = p.add(nodes::image::source(grey_media(8, 8))).unwrap();
    let sink = p.add(nodes::image::sink()).unwrap();
    p.connect(source.output("out"), sink.input("in")).unwrap();
    p.init().unwrap();
    assert!(p.execution_order().is_some());

    // Adding a node drops back to the unvalidated state.
    p.add(nodes::image::greyscale()).unwrap();
    assert!(p.execution_order().is_none());
}
