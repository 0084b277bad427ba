pub mod compiler;
pub mod dsp;
pub mod error;
pub mod expr;
pub mod handles;
pub mod patch;
pub mod voices;

use wasm_bindgen::prelude::*;

use crate::compiler::CompileOptions;
use crate::error::{CompileError, PatchError};
use crate::patch::PatchDoc;
use crate::voices::pool::{NoteEvent, SoloVoice};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the tonegraph-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Decode a patch document from JSON, accepting the legacy flattened
/// payload shape for array-valued combinators.
pub fn parse_patch(json: &str) -> Result<PatchDoc, PatchError> {
    PatchDoc::from_json(json)
}

/// Render a one-note preview of a patch: note-on at the start, note-off at
/// the gate boundary, mono samples covering the full span.
pub fn render_preview(
    doc: &PatchDoc,
    sample_rate: u32,
    event: NoteEvent,
    gate_seconds: f64,
    total_seconds: f64,
) -> Result<Vec<f64>, CompileError> {
    let rate = f64::from(sample_rate.max(1));
    let options = CompileOptions {
        max_sample_rate: rate,
        ..CompileOptions::default()
    };
    let mut voice = SoloVoice::new(doc, &options)?;

    let total = (total_seconds.max(0.0) * rate).round() as usize;
    let gate = ((gate_seconds.max(0.0) * rate).round() as usize).min(total);
    let times: Vec<f64> = (0..total).map(|i| i as f64 / rate).collect();
    let mut samples = vec![0.0; total];

    voice.note_on(event);
    voice.process(&times[..gate], &mut samples[..gate]);
    voice.note_off();
    voice.process(&times[gate..], &mut samples[gate..]);
    Ok(samples)
}

/// WASM-exposed: decode a patch JSON string and return the normalized
/// syntax tree, or a decode error naming the unrecognized parts.
#[wasm_bindgen]
pub fn validate_patch(json: &str) -> Result<JsValue, JsValue> {
    let doc = parse_patch(json).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    serde_wasm_bindgen::to_value(&doc).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: compile a patch and render a one-note mono preview.
/// Returns the raw audio buffer for AudioWorklet playback.
#[wasm_bindgen]
pub fn render_patch_preview(
    json: &str,
    sample_rate: u32,
    note: u8,
    velocity: u8,
    gate_seconds: f64,
    total_seconds: f64,
) -> Result<Vec<f32>, JsValue> {
    let doc = parse_patch(json).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    let event = NoteEvent { note, velocity };
    let samples = render_preview(&doc, sample_rate, event, gate_seconds, total_seconds)
        .map_err(|e| JsValue::from_str(&format!("{e}")))?;
    Ok(samples.iter().map(|&s| s as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_gates_the_envelope() {
        let doc = parse_patch(
            r#"{"graph": {"envelope":
                {"attack": 0.0, "decay": 0.0, "sustain": 1.0, "release": 0.01}}}"#,
        )
        .unwrap();
        let event = NoteEvent { note: 69, velocity: 127 };
        let samples = render_preview(&doc, 1000, event, 0.5, 1.0).unwrap();

        assert_eq!(samples.len(), 1000);
        assert!((samples[250] - 1.0).abs() < 1e-9, "Envelope holds while gated");
        assert_eq!(samples[999], 0.0, "Tail is silent long past the release");
    }

    #[test]
    fn preview_clamps_the_gate_to_the_span() {
        let doc = parse_patch(r#"{"graph": {"const": {"value": 1.0}}}"#).unwrap();
        let event = NoteEvent { note: 60, velocity: 100 };
        let samples = render_preview(&doc, 100, event, 10.0, 0.25).unwrap();
        assert_eq!(samples.len(), 25);

        let empty = render_preview(&doc, 100, event, 0.0, 0.0).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn malformed_documents_are_decode_errors() {
        assert!(parse_patch("[]").is_err());
        let err = parse_patch(r#"{"graph": {"wobble": {}}}"#).unwrap_err();
        assert!(format!("{err}").contains("wobble"), "Error should name the unknown kind");
    }
}
