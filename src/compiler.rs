//! Patch compiler: declarative syntax trees into live signal graphs.
//!
//! A single bottom-up pass. Each leaf builds its node and registers the
//! cells it owns; combinators compile children first and merge the child
//! registries into their own on the way up, so the returned registry lists
//! every injectable handle in the tree.

use rand::Rng;

use crate::dsp::envelope::{AdsrParams, EnvelopeHandle};
use crate::dsp::node::SigNode;
use crate::dsp::oscillator::{NoiseCore, SmoothNoiseCore, WaveShape};
use crate::error::CompileError;
use crate::expr::parse_expression;
use crate::handles::{ConstCell, HandleRegistry, ParamHandle};
use crate::patch::{CrossfadeSpec, OscShape, PatchDoc, PatchNode, RandomSpec};

// ── Options ─────────────────────────────────────────────────

/// Compile-time configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompileOptions {
    /// Highest sample rate the graph must support; sizes the delay lines.
    pub max_sample_rate: f64,
    /// Reference pitch for A4, in Hz.
    pub tuning_pitch: f64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            max_sample_rate: 48_000.0,
            tuning_pitch: 440.0,
        }
    }
}

/// A live graph plus the handles its leaves registered.
#[derive(Debug)]
pub struct CompiledPatch {
    pub node: SigNode,
    pub handles: HandleRegistry,
}

// ── Public API ──────────────────────────────────────────────

/// Resolve a document's library references, then compile its graph.
pub fn compile_doc(doc: &PatchDoc, options: &CompileOptions) -> Result<CompiledPatch, CompileError> {
    let resolved = doc.resolve()?;
    let compiled = compile_node(&resolved, options)?;
    tracing::debug!(
        name = doc.name.as_deref().unwrap_or(""),
        handles = compiled.handles.len(),
        "patch compiled"
    );
    Ok(compiled)
}

/// Compile one (already resolved) syntax tree.
pub fn compile_node(node: &PatchNode, options: &CompileOptions) -> Result<CompiledPatch, CompileError> {
    match node {
        PatchNode::Const(spec) => Ok(leaf_const(spec.value, spec.name.as_deref())),
        PatchNode::Octaves(spec) => Ok(leaf_const(spec.value.exp2(), spec.name.as_deref())),
        PatchNode::Cents(spec) => {
            Ok(leaf_const((spec.value / 1200.0).exp2(), spec.name.as_deref()))
        }
        PatchNode::Time {} => Ok(unregistered(SigNode::time())),
        PatchNode::NoteFreq {} => Ok(leaf_const(options.tuning_pitch, Some("freq"))),
        PatchNode::NoteVel {} => Ok(leaf_const(1.0, Some("vel"))),
        PatchNode::Free(spec) => Ok(leaf_const(spec.value, Some(&spec.name))),
        PatchNode::Osc(spec) => {
            let Some(shape) = wave_shape(spec.shape) else {
                // Noise ignores phase and width entirely
                return Ok(unregistered(SigNode::noise(NoiseCore::new())));
            };
            let mut handles = HandleRegistry::new();
            let width = match &spec.width {
                Some(node) => Some(compile_child(node, options, &mut handles)?),
                None => None,
            };
            Ok(CompiledPatch {
                node: SigNode::osc(shape, width),
                handles,
            })
        }
        PatchNode::NoiseSmooth(spec) => {
            Ok(unregistered(SigNode::smooth_noise(SmoothNoiseCore::new(spec.freq))))
        }
        PatchNode::Random(spec) => Ok(leaf_const(draw_uniform(spec), spec.name.as_deref())),
        PatchNode::ExpRandom(spec) => Ok(leaf_const(draw_log_uniform(spec), spec.name.as_deref())),
        PatchNode::Line(spec) => Ok(unregistered(SigNode::line(spec.from, spec.to, spec.seconds))),
        PatchNode::Lowpass(spec) => {
            let mut handles = HandleRegistry::new();
            let cutoff = compile_child(&spec.cutoff, options, &mut handles)?;
            let resonance = compile_child(&spec.resonance, options, &mut handles)?;
            Ok(CompiledPatch {
                node: SigNode::lowpass(cutoff, resonance),
                handles,
            })
        }
        PatchNode::Comb(spec) => {
            let mut handles = HandleRegistry::new();
            let freq = compile_child(&spec.freq, options, &mut handles)?;
            let feedback = compile_child(&spec.feedback, options, &mut handles)?;
            Ok(CompiledPatch {
                node: SigNode::comb(freq, feedback, options.max_sample_rate),
                handles,
            })
        }
        PatchNode::Envelope(spec) => {
            let handle = EnvelopeHandle::new(AdsrParams {
                attack: spec.attack,
                decay: spec.decay,
                sustain: spec.sustain,
                release: spec.release,
                scale: spec.scale,
            });
            let mut handles = HandleRegistry::new();
            handles.register(&spec.name, ParamHandle::Envelope(handle.clone()));
            Ok(CompiledPatch {
                node: SigNode::envelope(handle),
                handles,
            })
        }
        PatchNode::Chorus(spec) => {
            let child = compile_node(&spec.inner, options)?;
            let cell = child
                .handles
                .const_cell(&spec.param)
                .ok_or_else(|| CompileError::UnknownParam {
                    name: spec.param.clone(),
                })?;
            Ok(CompiledPatch {
                node: SigNode::chorus(child.node, cell, detune_ratios(spec.count, spec.cents)),
                handles: child.handles,
            })
        }
        PatchNode::Crossfade(spec) => compile_crossfade(spec, options, false),
        PatchNode::PowerCrossfade(spec) => compile_crossfade(spec, options, true),
        PatchNode::Sum(list) => {
            let (children, handles) = compile_list(&list.arr, options)?;
            Ok(CompiledPatch {
                node: SigNode::sum(children),
                handles,
            })
        }
        PatchNode::Product(list) => {
            let (children, handles) = compile_list(&list.arr, options)?;
            Ok(CompiledPatch {
                node: SigNode::product(children),
                handles,
            })
        }
        PatchNode::Compose(list) => {
            let mut handles = HandleRegistry::new();
            let mut chain: Option<SigNode> = None;
            for node in &list.arr {
                let mut compiled = compile_child(node, options, &mut handles)?;
                if let Some(upstream) = chain.take() {
                    compiled.set_input(upstream);
                }
                chain = Some(compiled);
            }
            Ok(CompiledPatch {
                node: chain.unwrap_or_else(SigNode::time),
                handles,
            })
        }
        PatchNode::Reciprocal(child) => {
            let compiled = compile_node(child, options)?;
            Ok(CompiledPatch {
                node: SigNode::reciprocal(Some(compiled.node)),
                handles: compiled.handles,
            })
        }
        PatchNode::Lib(spec) => Err(CompileError::Unresolved {
            name: spec.name.clone(),
        }),
        PatchNode::Expr(spec) => match parse_expression(&spec.text) {
            Ok(tree) => compile_node(&tree, options),
            Err(error) => {
                tracing::warn!(text = %spec.text, %error, "expression failed to parse, using silence");
                Ok(leaf_const(0.0, None))
            }
        },
    }
}

// ── Helpers ─────────────────────────────────────────────────

fn unregistered(node: SigNode) -> CompiledPatch {
    CompiledPatch {
        node,
        handles: HandleRegistry::new(),
    }
}

fn leaf_const(value: f64, name: Option<&str>) -> CompiledPatch {
    let cell = ConstCell::new(value);
    let mut handles = HandleRegistry::new();
    if let Some(name) = name {
        handles.register(name, ParamHandle::Const(cell.clone()));
    }
    CompiledPatch {
        node: SigNode::constant(cell),
        handles,
    }
}

fn compile_child(
    node: &PatchNode,
    options: &CompileOptions,
    handles: &mut HandleRegistry,
) -> Result<SigNode, CompileError> {
    let compiled = compile_node(node, options)?;
    handles.merge(compiled.handles);
    Ok(compiled.node)
}

fn compile_list(
    nodes: &[PatchNode],
    options: &CompileOptions,
) -> Result<(Vec<SigNode>, HandleRegistry), CompileError> {
    let mut handles = HandleRegistry::new();
    let mut children = Vec::with_capacity(nodes.len());
    for node in nodes {
        children.push(compile_child(node, options, &mut handles)?);
    }
    Ok((children, handles))
}

fn compile_crossfade(
    spec: &CrossfadeSpec,
    options: &CompileOptions,
    equal_power: bool,
) -> Result<CompiledPatch, CompileError> {
    let mut handles = HandleRegistry::new();
    let mix = compile_child(&spec.mix, options, &mut handles)?;
    let mut children = Vec::with_capacity(spec.arr.len());
    for node in &spec.arr {
        children.push(compile_child(node, options, &mut handles)?);
    }
    Ok(CompiledPatch {
        node: SigNode::crossfade(children, mix, equal_power),
        handles,
    })
}

fn wave_shape(shape: OscShape) -> Option<WaveShape> {
    match shape {
        OscShape::Sine => Some(WaveShape::Sine),
        OscShape::Triangle => Some(WaveShape::Triangle),
        OscShape::Sawtooth => Some(WaveShape::Sawtooth),
        OscShape::Square => Some(WaveShape::Square),
        OscShape::Noise => None,
    }
}

fn draw_uniform(spec: &RandomSpec) -> f64 {
    if spec.max > spec.min {
        rand::thread_rng().gen_range(spec.min..spec.max)
    } else {
        spec.min
    }
}

fn draw_log_uniform(spec: &RandomSpec) -> f64 {
    let lo = spec.min.max(1e-6);
    let hi = spec.max.max(lo);
    if hi > lo {
        rand::thread_rng().gen_range(lo.ln()..hi.ln()).exp()
    } else {
        lo
    }
}

/// Detune ratios spread symmetrically across `±cents`. One copy or fewer
/// needs no detuning at all.
fn detune_ratios(count: usize, cents: f64) -> Vec<f64> {
    if count <= 1 {
        return Vec::new();
    }
    (0..count)
        .map(|k| {
            let offset = cents * (2.0 * k as f64 / (count as f64 - 1.0) - 1.0);
            (offset / 1200.0).exp2()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_from_json(json: &str) -> PatchNode {
        serde_json::from_str(json).unwrap()
    }

    fn compile_json(json: &str) -> CompiledPatch {
        compile_node(&node_from_json(json), &CompileOptions::default()).unwrap()
    }

    fn render_one(compiled: &mut CompiledPatch, t: f64) -> f64 {
        let mut out = [0.0];
        compiled.node.process(&[t], &mut out);
        out[0]
    }

    #[test]
    fn expression_divides_through_reciprocal() {
        let mut compiled = compile_json(r#"{"expr": {"text": "1 / (2 + 3)"}}"#);
        let value = render_one(&mut compiled, 0.0);
        assert!((value - 0.2).abs() < 1e-12, "1/(2+3) should render 0.2, got {value}");
    }

    #[test]
    fn failed_expression_renders_silence() {
        let mut compiled = compile_json(r#"{"expr": {"text": "1 +"}}"#);
        assert_eq!(render_one(&mut compiled, 0.0), 0.0);
        assert!(compiled.handles.is_empty());
    }

    #[test]
    fn note_leaves_register_reserved_names() {
        let compiled = compile_json(r#"{"noteFreq": {}}"#);
        assert_eq!(compiled.handles.get("freq").len(), 1);

        let mut compiled = compile_json(r#"{"noteVel": {}}"#);
        assert_eq!(compiled.handles.get("vel").len(), 1);
        assert_eq!(render_one(&mut compiled, 0.0), 1.0, "Velocity defaults to full");
    }

    #[test]
    fn note_freq_defaults_to_tuning_pitch() {
        let options = CompileOptions {
            tuning_pitch: 432.0,
            ..CompileOptions::default()
        };
        let mut compiled = compile_node(&node_from_json(r#"{"noteFreq": {}}"#), &options).unwrap();
        assert_eq!(render_one(&mut compiled, 0.0), 432.0);
    }

    #[test]
    fn pitch_leaves_transform_to_factors() {
        let mut octave = compile_json(r#"{"octaves": {"value": 1.0}}"#);
        assert_eq!(render_one(&mut octave, 0.0), 2.0);

        let mut cents = compile_json(r#"{"cents": {"value": 1200.0}}"#);
        assert!((render_one(&mut cents, 0.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn free_parameter_is_injectable() {
        let mut compiled = compile_json(r#"{"free": {"name": "cutoff", "value": 100.0}}"#);
        assert_eq!(render_one(&mut compiled, 0.0), 100.0);

        assert_eq!(compiled.handles.set_consts("cutoff", 250.0), 1);
        assert_eq!(render_one(&mut compiled, 0.0), 250.0);
    }

    #[test]
    fn compose_wires_the_chain_serially() {
        let mut compiled = compile_json(
            r#"{"compose": {"arr": [
                {"product": {"arr": [{"time": {}}, {"noteFreq": {}}]}},
                {"osc": {"shape": "sine"}}
            ]}}"#,
        );
        // 1 Hz makes the phase equal the time itself
        compiled.handles.set_consts("freq", 1.0);
        let value = render_one(&mut compiled, 0.25);
        assert!((value - 1.0).abs() < 1e-9, "Sine at quarter phase should peak, got {value}");
    }

    #[test]
    fn empty_compose_is_the_identity() {
        let mut compiled = compile_json(r#"{"compose": {"arr": []}}"#);
        assert_eq!(render_one(&mut compiled, 5.0), 5.0);
    }

    #[test]
    fn legacy_flat_compose_compiles_too() {
        let mut compiled = compile_json(r#"{"compose": [{"const": {"value": 3.0}}]}"#);
        assert_eq!(render_one(&mut compiled, 0.0), 3.0);
    }

    #[test]
    fn noise_shape_compiles_to_a_generator() {
        let mut compiled = compile_json(r#"{"osc": {"shape": "noise"}}"#);
        let times: Vec<f64> = (0..64).map(|i| i as f64 / 48_000.0).collect();
        let mut out = vec![0.0; 64];
        compiled.node.process(&times, &mut out);
        assert!(out.iter().all(|s| (0.0..1.0).contains(s)));
        assert!(out.windows(2).any(|w| w[0] != w[1]), "Noise should vary");
    }

    #[test]
    fn random_draws_inside_bounds() {
        for _ in 0..50 {
            let mut compiled = compile_json(r#"{"random": {"min": 5.0, "max": 6.0}}"#);
            let value = render_one(&mut compiled, 0.0);
            assert!((5.0..6.0).contains(&value), "Out of bounds: {value}");
        }
    }

    #[test]
    fn degenerate_random_range_yields_min() {
        let mut compiled = compile_json(r#"{"random": {"min": 2.0, "max": 2.0}}"#);
        assert_eq!(render_one(&mut compiled, 0.0), 2.0);
    }

    #[test]
    fn exp_random_stays_inside_bounds() {
        for _ in 0..50 {
            let mut compiled = compile_json(r#"{"expRandom": {"min": 100.0, "max": 1000.0}}"#);
            let value = render_one(&mut compiled, 0.0);
            assert!((100.0..1000.0).contains(&value), "Out of bounds: {value}");
        }
    }

    #[test]
    fn chorus_requires_a_registered_param() {
        let result = compile_node(
            &node_from_json(
                r#"{"chorus": {"count": 3, "cents": 10.0, "param": "nope",
                    "inner": {"const": {"value": 1.0}}}}"#,
            ),
            &CompileOptions::default(),
        );
        assert_eq!(
            result.err(),
            Some(CompileError::UnknownParam { name: "nope".to_string() })
        );
    }

    #[test]
    fn chorus_spreads_copies_around_the_base() {
        // 1200 cents: copies at half and double the base frequency
        let mut compiled = compile_json(
            r#"{"chorus": {"count": 2, "cents": 1200.0, "param": "freq",
                "inner": {"noteFreq": {}}}}"#,
        );
        let value = render_one(&mut compiled, 0.0);
        assert!(
            (value - 1100.0).abs() < 1e-6,
            "440*0.5 + 440*2 should be 1100, got {value}"
        );
    }

    #[test]
    fn detune_ratios_are_symmetric() {
        let ratios = detune_ratios(3, 100.0);
        assert_eq!(ratios.len(), 3);
        assert!((ratios[0] - (-100.0_f64 / 1200.0).exp2()).abs() < 1e-12);
        assert_eq!(ratios[1], 1.0);
        assert!((ratios[2] - (100.0_f64 / 1200.0).exp2()).abs() < 1e-12);
        assert!(detune_ratios(1, 100.0).is_empty());
    }

    #[test]
    fn unresolved_lib_is_a_hard_error() {
        let result = compile_node(
            &node_from_json(r#"{"lib": {"name": "pad"}}"#),
            &CompileOptions::default(),
        );
        assert_eq!(result.err(), Some(CompileError::Unresolved { name: "pad".to_string() }));
    }

    #[test]
    fn compile_doc_resolves_before_compiling() {
        let doc: PatchDoc = serde_json::from_str(
            r#"{
                "library": {"tone": {"free": {"name": "detune", "value": 1.0}}},
                "graph": {"sum": {"arr": [{"lib": {"name": "tone"}}, {"lib": {"name": "tone"}}]}}
            }"#,
        )
        .unwrap();
        let compiled = compile_doc(&doc, &CompileOptions::default()).unwrap();
        assert_eq!(
            compiled.handles.get("detune").len(),
            2,
            "Each substituted copy registers its own cell"
        );
    }

    #[test]
    fn compiled_graphs_survive_odd_buffers_and_gaps() {
        let mut compiled = compile_json(
            r#"{"compose": {"arr": [
                {"chorus": {"count": 3, "cents": 15.0, "param": "freq",
                    "inner": {"compose": {"arr": [
                        {"product": {"arr": [{"time": {}}, {"noteFreq": {}}]}},
                        {"osc": {"shape": "sawtooth",
                            "width": {"free": {"name": "width", "value": 0.9}}}}
                    ]}}}},
                {"lowpass": {"cutoff": {"expr": {"text": "freq * 4 + 200"}},
                             "resonance": {"const": {"value": 1.2}}}},
                {"comb": {"freq": {"noteFreq": {}}, "feedback": {"const": {"value": 0.6}}}},
                {"envelope": {"attack": 0.005, "decay": 0.05, "sustain": 0.6, "release": 0.1}}
            ]}}"#,
        );
        for envelope in compiled.handles.envelopes() {
            envelope.note_on();
        }

        let mut start = 0.0;
        for len in [0usize, 1, 3, 64, 511, 4096, 5000] {
            let times: Vec<f64> = (0..len).map(|i| start + i as f64 / 44_100.0).collect();
            let mut out = vec![0.0; len];
            compiled.node.process(&times, &mut out);
            assert_eq!(out.len(), len);
            assert!(
                out.iter().all(|s| s.is_finite()),
                "Non-finite sample in a buffer of {len}"
            );
            // Leave a half-second hole before the next buffer; stateful
            // nodes must absorb the jump instead of blowing up
            start += len as f64 / 44_100.0 + 0.5;
        }
    }

    #[test]
    fn registries_merge_across_nested_children() {
        let compiled = compile_json(
            r#"{"lowpass": {
                "cutoff": {"free": {"name": "cutoff", "value": 800.0}},
                "resonance": {"free": {"name": "res", "value": 0.7}}
            }}"#,
        );
        assert_eq!(compiled.handles.len(), 2);
        assert_eq!(compiled.handles.get("cutoff").len(), 1);
        assert_eq!(compiled.handles.get("res").len(), 1);
    }

    #[test]
    fn envelope_registers_under_its_name() {
        let compiled = compile_json(
            r#"{"envelope": {"attack": 0.01, "decay": 0.1, "sustain": 0.7, "release": 0.3}}"#,
        );
        assert_eq!(compiled.handles.get("env").len(), 1);
        assert_eq!(compiled.handles.envelopes().count(), 1);
    }
}
