//! Voice bookkeeping: which voice owns which note, and in what state.
//!
//! A single mutex guards the whole ledger. Every slot is in exactly one of
//! three states (available, held, releasing), an activation queue orders
//! voices oldest-first for eviction, and a fixed note table binds MIDI
//! notes to voices without allocating. Critical sections are short scans
//! and never take another lock; envelope watchers are armed only after the
//! ledger lock is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dsp::envelope::{EnvelopeHandle, FinishListener, ReleaseWatcher};

/// Lifecycle of one voice slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Available,
    Held,
    Releasing,
}

#[derive(Debug)]
struct LedgerState {
    slots: Vec<Slot>,
    /// Voice indices by activation time, oldest first. Always a
    /// permutation of `0..slots.len()`.
    order: VecDeque<usize>,
    /// MIDI note to owning voice. At most one voice per note.
    note_to_voice: [Option<usize>; 128],
    bound_note: Vec<Option<u8>>,
}

impl LedgerState {
    /// Oldest-activated voice currently in the wanted state.
    fn pick(&self, wanted: Slot) -> Option<usize> {
        self.order.iter().copied().find(|&v| self.slots[v] == wanted)
    }

    /// Move a voice to the back of the activation queue.
    fn touch(&mut self, voice: usize) {
        if let Some(at) = self.order.iter().position(|&v| v == voice) {
            self.order.remove(at);
        }
        self.order.push_back(voice);
    }

    fn unbind(&mut self, voice: usize) {
        if let Some(note) = self.bound_note[voice].take() {
            self.note_to_voice[note as usize] = None;
        }
    }
}

/// Three-tier voice allocator shared between the render and dispatch
/// threads.
#[derive(Debug)]
pub struct VoiceLedger {
    state: Mutex<LedgerState>,
    envelopes: Vec<Vec<EnvelopeHandle>>,
}

impl VoiceLedger {
    pub fn new(voice_count: usize) -> VoiceLedger {
        let count = voice_count.max(1);
        VoiceLedger {
            state: Mutex::new(LedgerState {
                slots: vec![Slot::Available; count],
                order: (0..count).collect(),
                note_to_voice: [None; 128],
                bound_note: vec![None; count],
            }),
            envelopes: vec![Vec::new(); count],
        }
    }

    /// Attach each voice's envelope handles. Happens once, before the
    /// ledger is shared; the lists are immutable afterwards.
    pub fn register_envelopes(&mut self, per_voice: Vec<Vec<EnvelopeHandle>>) {
        for (slot, handles) in self.envelopes.iter_mut().zip(per_voice) {
            *slot = handles;
        }
    }

    pub fn voice_count(&self) -> usize {
        self.envelopes.len()
    }

    /// True while the voice holds or releases a note.
    pub fn is_active(&self, voice: usize) -> bool {
        let state = self.lock();
        state.slots.get(voice).is_some_and(|s| *s != Slot::Available)
    }

    /// Claim a voice for `note`. Prefers the oldest available voice, then
    /// steals the oldest releasing one, then the oldest held one. A note
    /// already bound elsewhere loses its old binding first.
    pub fn allocate(&self, note: u8) -> usize {
        let note = note.min(127);
        let mut state = self.lock();

        if let Some(prev) = state.note_to_voice[note as usize].take() {
            state.bound_note[prev] = None;
        }

        let voice = state
            .pick(Slot::Available)
            .or_else(|| state.pick(Slot::Releasing))
            .or_else(|| state.pick(Slot::Held))
            .unwrap_or(0);

        state.unbind(voice);
        state.slots[voice] = Slot::Held;
        state.bound_note[voice] = Some(note);
        state.note_to_voice[note as usize] = Some(voice);
        state.touch(voice);
        voice
    }

    /// Start releasing `note`'s voice and arm one shared watcher across its
    /// registered envelopes, so the slot frees itself once every envelope
    /// closes. Unknown notes are a no-op.
    pub fn begin_release(ledger: &Arc<VoiceLedger>, note: u8) -> Option<usize> {
        let voice = {
            let mut state = ledger.lock();
            let voice = state.note_to_voice[note.min(127) as usize].take()?;
            state.slots[voice] = Slot::Releasing;
            state.bound_note[voice] = None;
            voice
        };
        let handles = &ledger.envelopes[voice];
        if !handles.is_empty() {
            let listener = Arc::clone(ledger) as Arc<dyn FinishListener>;
            let watcher = Arc::new(ReleaseWatcher::new(listener, voice, handles.len()));
            for handle in handles {
                handle.arm_watcher(Arc::clone(&watcher));
            }
        }
        Some(voice)
    }

    /// Mark a releasing voice available again. Idempotent; a voice stolen
    /// in the meantime keeps its new state.
    pub fn finish_release(&self, voice: usize) {
        let mut state = self.lock();
        if state.slots.get(voice) == Some(&Slot::Releasing) {
            state.slots[voice] = Slot::Available;
        }
    }

    /// Immediately reclaim `note`'s voice without touching envelopes, for
    /// hosts that run their own release stage.
    pub fn release_voice(&self, note: u8) -> Option<usize> {
        let mut state = self.lock();
        let voice = state.note_to_voice[note.min(127) as usize].take()?;
        state.slots[voice] = Slot::Available;
        state.bound_note[voice] = None;
        Some(voice)
    }

    pub(crate) fn voice_envelopes(&self, voice: usize) -> &[EnvelopeHandle] {
        self.envelopes.get(voice).map(Vec::as_slice).unwrap_or(&[])
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FinishListener for VoiceLedger {
    fn all_closed(&self, voice: usize) {
        self.finish_release(voice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::envelope::AdsrParams;

    #[test]
    fn two_voices_walk_all_three_tiers() {
        let ledger = Arc::new(VoiceLedger::new(2));
        assert_eq!(ledger.allocate(60), 0);
        assert_eq!(ledger.allocate(62), 1);

        // Nothing free, nothing releasing: steal the oldest held voice.
        assert_eq!(ledger.allocate(64), 0);
        assert_eq!(
            VoiceLedger::begin_release(&ledger, 60),
            None,
            "The stolen voice's old note must release as a no-op"
        );

        assert_eq!(VoiceLedger::begin_release(&ledger, 62), Some(1));
        assert_eq!(ledger.allocate(70), 1, "A releasing voice is stolen before a held one");
    }

    #[test]
    fn available_tier_prefers_the_oldest_voice() {
        let ledger = VoiceLedger::new(3);
        assert_eq!(ledger.allocate(10), 0);
        ledger.release_voice(10);
        assert_eq!(ledger.allocate(11), 1, "Voice 0 was activated most recently");
    }

    #[test]
    fn finish_release_ignores_a_stolen_voice() {
        let ledger = Arc::new(VoiceLedger::new(1));
        ledger.allocate(60);
        VoiceLedger::begin_release(&ledger, 60);
        ledger.allocate(61);

        // A stale finish callback must not free the freshly stolen voice.
        ledger.finish_release(0);
        assert!(ledger.is_active(0));

        assert_eq!(VoiceLedger::begin_release(&ledger, 61), Some(0));
        ledger.finish_release(0);
        assert!(!ledger.is_active(0));
        ledger.finish_release(0);
        assert!(!ledger.is_active(0));
    }

    #[test]
    fn retrigger_evicts_the_previous_binding() {
        let ledger = Arc::new(VoiceLedger::new(2));
        assert_eq!(ledger.allocate(60), 0);
        assert_eq!(ledger.allocate(60), 1);
        assert_eq!(
            VoiceLedger::begin_release(&ledger, 60),
            Some(1),
            "The newest binding owns the note"
        );
        assert_eq!(VoiceLedger::begin_release(&ledger, 60), None);
    }

    #[test]
    fn envelope_close_frees_the_slot() {
        let mut ledger = VoiceLedger::new(1);
        let env = EnvelopeHandle::new(AdsrParams {
            release: 0.1,
            ..AdsrParams::default()
        });
        ledger.register_envelopes(vec![vec![env.clone()]]);
        let ledger = Arc::new(ledger);

        ledger.allocate(60);
        env.note_on();
        env.value_at(0.05);
        assert_eq!(VoiceLedger::begin_release(&ledger, 60), Some(0));
        env.note_off();
        assert!(ledger.is_active(0), "Slot stays releasing while the tail sounds");

        // Drive the envelope past its release span; its watcher frees the slot.
        env.value_at(5.0);
        env.value_at(5.2);
        assert!(!ledger.is_active(0));
    }

    #[test]
    fn zero_voices_clamp_to_one() {
        let ledger = VoiceLedger::new(0);
        assert_eq!(ledger.voice_count(), 1);
        assert_eq!(ledger.allocate(60), 0);
    }
}
