//! Patch description types for the declarative patch format.
//!
//! A patch is a JSON tree of nodes that compiles into a live signal graph.
//! These types map directly to the `patch.json` schema: every node is an
//! object with exactly one key naming the node kind, and a kind-specific
//! payload under it. Documents add an optional library of named subtrees
//! that `lib` nodes reference by substitution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, PatchError};

/// One node of the patch syntax tree.
///
/// Externally tagged: `{"osc": {"shape": "sawtooth"}}`. Array-valued
/// combinators additionally decode the legacy flattened payload (see
/// [`NodeArr`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchNode {
    /// Constant value, optionally published as a named parameter.
    Const(ValueSpec),
    /// Constant pitch factor `2^value`.
    Octaves(ValueSpec),
    /// Constant pitch factor `2^(value/1200)`.
    Cents(ValueSpec),
    /// Identity over the time buffer (or over a composed input).
    Time {},
    /// The frequency of the most recent note event, in Hz.
    NoteFreq {},
    /// The velocity gain of the most recent note event, `0..=1`.
    NoteVel {},
    /// A named runtime-injectable parameter.
    Free(FreeSpec),
    /// Waveform generator driven by its composed phase input.
    Osc(OscSpec),
    /// Smoothstep-interpolated random signal.
    NoiseSmooth(NoiseSmoothSpec),
    /// Uniform random constant, drawn once at compile time.
    Random(RandomSpec),
    /// Log-uniform random constant, drawn once at compile time.
    ExpRandom(RandomSpec),
    /// Clamped linear ramp over absolute time.
    Line(LineSpec),
    /// Resonant low-pass filter; cutoff and resonance are child signals.
    Lowpass(FilterSpec),
    /// Karplus-Strong feedback comb; freq and feedback are child signals.
    Comb(CombSpec),
    /// ADSR envelope scaling its composed input.
    Envelope(EnvelopeSpec),
    /// Detuned unison copies of a subtree, spread around a named constant.
    Chorus(ChorusSpec),
    /// Linear crossfade across `arr`, positioned by the `mix` signal.
    Crossfade(CrossfadeSpec),
    /// Equal-power crossfade across `arr`.
    PowerCrossfade(CrossfadeSpec),
    Sum(NodeArr),
    Product(NodeArr),
    /// Serial wiring: each node's signal input is the previous result.
    Compose(NodeArr),
    /// `1/x` of the child tree.
    Reciprocal(Box<PatchNode>),
    /// Reference to a library subtree, replaced before compilation.
    Lib(LibSpec),
    /// Arithmetic expression compiled into a subtree.
    Expr(ExprSpec),
}

/// Payload for the constant leaves (`const` / `octaves` / `cents`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSpec {
    pub value: f64,
    /// Published parameter name; anonymous constants are not injectable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Payload for `free`: a named parameter with an initial value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeSpec {
    pub name: String,
    #[serde(default)]
    pub value: f64,
}

/// Waveform shapes for `osc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OscShape {
    Sine,
    Triangle,
    Sawtooth,
    Square,
    Noise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscSpec {
    pub shape: OscShape,
    /// Pulse-width signal; defaults to a full cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<Box<PatchNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseSmoothSpec {
    /// Endpoint frequency in Hz.
    pub freq: f64,
}

/// Payload for `random` / `expRandom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomSpec {
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_random_max")]
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_random_max() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSpec {
    pub from: f64,
    pub to: f64,
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub cutoff: Box<PatchNode>,
    pub resonance: Box<PatchNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombSpec {
    pub freq: Box<PatchNode>,
    pub feedback: Box<PatchNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeSpec {
    /// Seconds from note-on to peak.
    pub attack: f64,
    /// Seconds from peak to sustain.
    pub decay: f64,
    /// Sustain level as a fraction of `scale`.
    pub sustain: f64,
    /// Seconds from note-off to silence.
    pub release: f64,
    #[serde(default = "default_envelope_scale")]
    pub scale: f64,
    /// Registry name; unnamed envelopes share the default so note events
    /// still reach them.
    #[serde(default = "default_envelope_name", skip_serializing_if = "is_default_envelope_name")]
    pub name: String,
}

fn default_envelope_scale() -> f64 {
    1.0
}

fn default_envelope_name() -> String {
    "env".to_string()
}

fn is_default_envelope_name(name: &str) -> bool {
    name == "env"
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChorusSpec {
    /// Number of detuned copies.
    pub count: usize,
    /// Total half-spread in cents; copies sit at `±cents` and between.
    pub cents: f64,
    /// Name of the constant the copies detune, registered by `inner`.
    pub param: String,
    pub inner: Box<PatchNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossfadeSpec {
    /// Mix position signal, `0 .. arr.len()-1`.
    pub mix: Box<PatchNode>,
    pub arr: Vec<PatchNode>,
}

/// Child list for `sum` / `product` / `compose`.
///
/// Always serializes as the named form `{"arr": [...]}`, but also decodes
/// the older flattened form where the payload is the bare array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "NodeArrShape")]
pub struct NodeArr {
    pub arr: Vec<PatchNode>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NodeArrShape {
    Named { arr: Vec<PatchNode> },
    Flat(Vec<PatchNode>),
}

impl From<NodeArrShape> for NodeArr {
    fn from(shape: NodeArrShape) -> Self {
        match shape {
            NodeArrShape::Named { arr } => NodeArr { arr },
            NodeArrShape::Flat(arr) => NodeArr { arr },
        }
    }
}

impl From<Vec<PatchNode>> for NodeArr {
    fn from(arr: Vec<PatchNode>) -> Self {
        NodeArr { arr }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibSpec {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprSpec {
    pub text: String,
}

/// A complete patch document: optional name, a library of named subtrees,
/// and the instrument graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub library: BTreeMap<String, PatchNode>,
    pub graph: PatchNode,
}

impl PatchDoc {
    pub fn from_json(json: &str) -> Result<Self, PatchError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, PatchError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Replace every `lib` reference with a deep copy of the named library
    /// subtree. Each occurrence gets its own copy, so duplicated subtrees
    /// hold independent runtime state after compilation.
    pub fn resolve(&self) -> Result<PatchNode, CompileError> {
        let mut stack = Vec::new();
        resolve_node(&self.graph, &self.library, &mut stack)
    }
}

fn resolve_node(
    node: &PatchNode,
    library: &BTreeMap<String, PatchNode>,
    stack: &mut Vec<String>,
) -> Result<PatchNode, CompileError> {
    let resolved = match node {
        PatchNode::Lib(spec) => {
            if stack.contains(&spec.name) {
                return Err(CompileError::RecursiveReference {
                    name: spec.name.clone(),
                });
            }
            let target = library
                .get(&spec.name)
                .ok_or_else(|| CompileError::UnknownReference {
                    name: spec.name.clone(),
                })?;
            stack.push(spec.name.clone());
            let resolved = resolve_node(target, library, stack)?;
            stack.pop();
            resolved
        }
        PatchNode::Osc(spec) => PatchNode::Osc(OscSpec {
            shape: spec.shape,
            width: match &spec.width {
                Some(width) => Some(Box::new(resolve_node(width, library, stack)?)),
                None => None,
            },
        }),
        PatchNode::Lowpass(spec) => PatchNode::Lowpass(FilterSpec {
            cutoff: Box::new(resolve_node(&spec.cutoff, library, stack)?),
            resonance: Box::new(resolve_node(&spec.resonance, library, stack)?),
        }),
        PatchNode::Comb(spec) => PatchNode::Comb(CombSpec {
            freq: Box::new(resolve_node(&spec.freq, library, stack)?),
            feedback: Box::new(resolve_node(&spec.feedback, library, stack)?),
        }),
        PatchNode::Envelope(spec) => PatchNode::Envelope(spec.clone()),
        PatchNode::Chorus(spec) => PatchNode::Chorus(ChorusSpec {
            count: spec.count,
            cents: spec.cents,
            param: spec.param.clone(),
            inner: Box::new(resolve_node(&spec.inner, library, stack)?),
        }),
        PatchNode::Crossfade(spec) => PatchNode::Crossfade(resolve_crossfade(spec, library, stack)?),
        PatchNode::PowerCrossfade(spec) => {
            PatchNode::PowerCrossfade(resolve_crossfade(spec, library, stack)?)
        }
        PatchNode::Sum(children) => PatchNode::Sum(resolve_arr(children, library, stack)?),
        PatchNode::Product(children) => PatchNode::Product(resolve_arr(children, library, stack)?),
        PatchNode::Compose(children) => PatchNode::Compose(resolve_arr(children, library, stack)?),
        PatchNode::Reciprocal(child) => {
            PatchNode::Reciprocal(Box::new(resolve_node(child, library, stack)?))
        }
        other => other.clone(),
    };
    Ok(resolved)
}

fn resolve_crossfade(
    spec: &CrossfadeSpec,
    library: &BTreeMap<String, PatchNode>,
    stack: &mut Vec<String>,
) -> Result<CrossfadeSpec, CompileError> {
    Ok(CrossfadeSpec {
        mix: Box::new(resolve_node(&spec.mix, library, stack)?),
        arr: spec
            .arr
            .iter()
            .map(|child| resolve_node(child, library, stack))
            .collect::<Result<_, _>>()?,
    })
}

fn resolve_arr(
    children: &NodeArr,
    library: &BTreeMap<String, PatchNode>,
    stack: &mut Vec<String>,
) -> Result<NodeArr, CompileError> {
    let arr = children
        .arr
        .iter()
        .map(|child| resolve_node(child, library, stack))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(NodeArr { arr })
}
