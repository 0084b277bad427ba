//! Polyphonic voice pool: one compiled graph per voice, mixed by plain
//! summation, driven by note events from any thread.

use std::sync::Arc;

use crate::compiler::{CompileOptions, CompiledPatch, compile_doc, compile_node};
use crate::dsp::envelope::EnvelopeHandle;
use crate::dsp::node::{MAX_BLOCK, SigNode};
use crate::error::CompileError;
use crate::handles::HandleRegistry;
use crate::patch::PatchDoc;
use crate::voices::ledger::VoiceLedger;

/// A note event as delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub note: u8,
    pub velocity: u8,
}

impl NoteEvent {
    /// Equal-tempered frequency around the given A4 reference.
    pub fn frequency(&self, tuning_pitch: f64) -> f64 {
        tuning_pitch * ((f64::from(self.note) - 69.0) / 12.0).exp2()
    }

    /// Velocity as a unit gain factor.
    pub fn gain(&self) -> f64 {
        f64::from(self.velocity.min(127)) / 127.0
    }
}

/// Dispatch-side handle. Clones are cheap and safe to hand to other
/// threads; the render side never blocks on them beyond the ledger mutex.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    ledger: Arc<VoiceLedger>,
    registries: Arc<[HandleRegistry]>,
    tuning_pitch: f64,
}

impl PoolHandle {
    /// Claim a voice, point its graph at the event's pitch and gain, and
    /// open its envelopes. Returns the claimed voice index.
    pub fn note_on(&self, event: NoteEvent) -> usize {
        let voice = self.ledger.allocate(event.note);
        if let Some(registry) = self.registries.get(voice) {
            registry.set_consts("freq", event.frequency(self.tuning_pitch));
            registry.set_consts("vel", event.gain());
            for envelope in registry.envelopes() {
                envelope.note_on();
            }
        }
        voice
    }

    /// Release the note's voice into its envelope tail.
    pub fn note_off(&self, note: u8) -> Option<usize> {
        let voice = VoiceLedger::begin_release(&self.ledger, note)?;
        for envelope in self.ledger.voice_envelopes(voice) {
            envelope.note_off();
        }
        Some(voice)
    }

    /// Reclaim the note's voice immediately, skipping the release tail.
    pub fn release_now(&self, note: u8) -> Option<usize> {
        self.ledger.release_voice(note)
    }

    /// Write every voice's cells registered under `name`. Returns how many
    /// cells changed.
    pub fn set_consts(&self, name: &str, value: f64) -> usize {
        self.registries.iter().map(|r| r.set_consts(name, value)).sum()
    }

    /// A voice whose slot is free and whose envelopes all report closed
    /// contributes only silence.
    fn is_idle(&self, voice: usize) -> bool {
        !self.ledger.is_active(voice)
            && self
                .ledger
                .voice_envelopes(voice)
                .iter()
                .all(EnvelopeHandle::is_closed)
    }
}

/// A fixed bank of identically compiled graphs.
#[derive(Debug)]
pub struct VoicePool {
    voices: Vec<SigNode>,
    shared: PoolHandle,
    scratch: Box<[f64]>,
}

impl VoicePool {
    /// Compile the document once per voice, so every voice owns
    /// independent runtime state, and wire their envelopes into a shared
    /// ledger.
    pub fn new(
        doc: &PatchDoc,
        voice_count: usize,
        options: &CompileOptions,
    ) -> Result<VoicePool, CompileError> {
        let resolved = doc.resolve()?;
        let count = voice_count.max(1);
        let mut voices = Vec::with_capacity(count);
        let mut registries = Vec::with_capacity(count);
        let mut envelopes = Vec::with_capacity(count);
        for _ in 0..count {
            let CompiledPatch { node, handles } = compile_node(&resolved, options)?;
            envelopes.push(handles.envelopes().cloned().collect());
            voices.push(node);
            registries.push(handles);
        }
        let mut ledger = VoiceLedger::new(count);
        ledger.register_envelopes(envelopes);
        tracing::debug!(voices = count, "voice pool compiled");
        Ok(VoicePool {
            voices,
            shared: PoolHandle {
                ledger: Arc::new(ledger),
                registries: registries.into(),
                tuning_pitch: options.tuning_pitch,
            },
            scratch: vec![0.0; MAX_BLOCK].into_boxed_slice(),
        })
    }

    /// A dispatch handle for note events.
    pub fn handle(&self) -> PoolHandle {
        self.shared.clone()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Mix every sounding voice into `out`; idle voices are skipped.
    pub fn process(&mut self, times: &[f64], out: &mut [f64]) {
        for o in out.iter_mut() {
            *o = 0.0;
        }
        let len = times.len().min(out.len());
        let shared = &self.shared;
        let scratch = &mut self.scratch;
        for (chunk, block) in times[..len]
            .chunks(MAX_BLOCK)
            .zip(out[..len].chunks_mut(MAX_BLOCK))
        {
            for (voice, node) in self.voices.iter_mut().enumerate() {
                if shared.is_idle(voice) {
                    continue;
                }
                let scratch = &mut scratch[..chunk.len()];
                node.process(chunk, scratch);
                for (o, s) in block.iter_mut().zip(scratch.iter()) {
                    *o += *s;
                }
            }
        }
    }
}

/// One compiled graph with the pool's note interface, minus the ledger,
/// for hosts that run a single sustained voice.
#[derive(Debug)]
pub struct SoloVoice {
    node: SigNode,
    handles: HandleRegistry,
    tuning_pitch: f64,
}

impl SoloVoice {
    pub fn new(doc: &PatchDoc, options: &CompileOptions) -> Result<SoloVoice, CompileError> {
        let compiled = compile_doc(doc, options)?;
        Ok(SoloVoice {
            node: compiled.node,
            handles: compiled.handles,
            tuning_pitch: options.tuning_pitch,
        })
    }

    pub fn note_on(&self, event: NoteEvent) {
        self.handles.set_consts("freq", event.frequency(self.tuning_pitch));
        self.handles.set_consts("vel", event.gain());
        for envelope in self.handles.envelopes() {
            envelope.note_on();
        }
    }

    pub fn note_off(&self) {
        for envelope in self.handles.envelopes() {
            envelope.note_off();
        }
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    pub fn process(&mut self, times: &[f64], out: &mut [f64]) {
        self.node.process(times, out);
    }
}
