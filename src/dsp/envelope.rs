//! ADSR envelope with retrigger continuity and release-completion hooks.
//!
//! The state machine (`AdsrCore`) is a pure function of time once a
//! transition is recorded: only Closed, Attack, and Release exist, and the
//! attack/decay/sustain phases are measured from the attack origin. Every
//! transition captures the value in effect at that instant, so retriggering
//! a releasing voice ramps from where the fade-out currently sits instead
//! of snapping to zero (the anti-click guarantee).
//!
//! `EnvelopeHandle` is the note-event adapter shared between the graph
//! node and the dispatch thread; `ReleaseWatcher` is the countdown that
//! tells the voice ledger when every envelope of a voice has closed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Notified when every envelope of a voice has finished releasing.
pub trait FinishListener: Send + Sync {
    fn all_closed(&self, voice: usize);
}

/// Countdown shared by the envelopes of one releasing voice.
///
/// Each closing envelope decrements once; the final decrement notifies the
/// listener. Firing allocates nothing and runs O(1).
pub struct ReleaseWatcher {
    listener: Arc<dyn FinishListener>,
    voice: usize,
    pending: AtomicUsize,
}

impl ReleaseWatcher {
    pub fn new(listener: Arc<dyn FinishListener>, voice: usize, envelopes: usize) -> Self {
        Self {
            listener,
            voice,
            pending: AtomicUsize::new(envelopes.max(1)),
        }
    }

    /// One envelope closed; the last one through notifies the listener.
    pub fn envelope_closed(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.listener.all_closed(self.voice);
        }
    }
}

impl fmt::Debug for ReleaseWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseWatcher")
            .field("voice", &self.voice)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

/// Envelope timing parameters, all in seconds except the unitless levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdsrParams {
    pub attack: f64,
    pub decay: f64,
    /// Sustain level as a fraction of `scale`.
    pub sustain: f64,
    pub release: f64,
    /// Peak output value at the top of the attack.
    pub scale: f64,
}

impl Default for AdsrParams {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.3,
            scale: 1.0,
        }
    }
}

/// Stage plus the transition origin and the value captured at it.
///
/// `since` stays `None` until the first evaluation after the transition:
/// note events carry no timestamp, so the ramp starts at the next rendered
/// sample. An idle-gated voice therefore cannot inherit a stale origin and
/// skip its attack.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Closed,
    Attack { since: Option<f64>, from: f64 },
    Release { since: Option<f64>, from: f64 },
}

/// Pure ADSR generation core.
#[derive(Debug)]
pub struct AdsrCore {
    params: AdsrParams,
    stage: Stage,
    /// Last evaluated output value.
    level: f64,
    watcher: Option<Arc<ReleaseWatcher>>,
}

impl AdsrCore {
    pub fn new(params: AdsrParams) -> Self {
        Self {
            params,
            stage: Stage::Closed,
            level: 0.0,
            watcher: None,
        }
    }

    pub fn params(&self) -> &AdsrParams {
        &self.params
    }

    pub fn is_closed(&self) -> bool {
        self.stage == Stage::Closed
    }

    /// Begin the attack from the current output value.
    pub fn note_on(&mut self) {
        self.stage = Stage::Attack {
            since: None,
            from: self.level, // retrigger from current level
        };
        // A steal mid-release abandons the old countdown
        self.watcher = None;
    }

    /// Begin the release from the current output value.
    pub fn note_off(&mut self) {
        if self.stage == Stage::Closed {
            return;
        }
        self.stage = Stage::Release {
            since: None,
            from: self.level,
        };
    }

    pub fn arm(&mut self, watcher: Arc<ReleaseWatcher>) {
        self.watcher = Some(watcher);
    }

    /// A watcher whose envelope has closed, ready to fire.
    ///
    /// The caller fires it after dropping the lock around this core, so the
    /// countdown never runs with an envelope mutex held.
    pub fn take_finished_watcher(&mut self) -> Option<Arc<ReleaseWatcher>> {
        if self.stage == Stage::Closed {
            self.watcher.take()
        } else {
            None
        }
    }

    /// Evaluate the envelope at time `t`, advancing the machine.
    pub fn value_at(&mut self, t: f64) -> f64 {
        let p = self.params;
        self.level = match self.stage {
            Stage::Closed => 0.0,
            Stage::Attack { since, from } => {
                let origin = since.unwrap_or(t);
                if since.is_none() {
                    self.stage = Stage::Attack { since: Some(origin), from };
                }
                let elapsed = (t - origin).max(0.0);
                if elapsed < p.attack {
                    from + (p.scale - from) * (elapsed / p.attack)
                } else if elapsed < p.attack + p.decay {
                    let d = (elapsed - p.attack) / p.decay;
                    p.scale + (p.sustain * p.scale - p.scale) * d
                } else {
                    p.sustain * p.scale
                }
            }
            Stage::Release { since, from } => {
                let origin = since.unwrap_or(t);
                if since.is_none() {
                    self.stage = Stage::Release { since: Some(origin), from };
                }
                let elapsed = (t - origin).max(0.0);
                if elapsed < p.release {
                    from * (1.0 - elapsed / p.release)
                } else {
                    self.stage = Stage::Closed;
                    0.0
                }
            }
        };
        self.level
    }
}

/// Shared note-event adapter over an [`AdsrCore`].
///
/// The graph node locks the core once per block; note events lock it for
/// O(1) transitions. The closed flag is readable without the lock so idle
/// voices can be gated cheaply.
#[derive(Clone, Debug)]
pub struct EnvelopeHandle {
    inner: Arc<EnvelopeShared>,
}

#[derive(Debug)]
struct EnvelopeShared {
    core: Mutex<AdsrCore>,
    closed: AtomicBool,
}

impl EnvelopeHandle {
    pub fn new(params: AdsrParams) -> Self {
        Self {
            inner: Arc::new(EnvelopeShared {
                core: Mutex::new(AdsrCore::new(params)),
                closed: AtomicBool::new(true),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdsrCore> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn note_on(&self) {
        self.lock().note_on();
        self.inner.closed.store(false, Ordering::Release);
    }

    pub fn note_off(&self) {
        self.lock().note_off();
    }

    /// True when the envelope sits closed (never opened, or fully released).
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Attach a release-completion watcher.
    ///
    /// An envelope that is already closed counts down immediately, so a
    /// voice whose envelopes never opened still completes its release.
    pub fn arm_watcher(&self, watcher: Arc<ReleaseWatcher>) {
        let mut core = self.lock();
        if core.is_closed() {
            drop(core);
            watcher.envelope_closed();
        } else {
            core.arm(watcher);
        }
    }

    /// Evaluate one block. With `multiply` the envelope scales `out` in
    /// place; otherwise it overwrites `out` with the raw envelope value.
    pub(crate) fn render(&self, times: &[f64], out: &mut [f64], multiply: bool) {
        let fired = {
            let mut core = self.lock();
            for (t, o) in times.iter().zip(out.iter_mut()) {
                let v = core.value_at(*t);
                if multiply {
                    *o *= v;
                } else {
                    *o = v;
                }
            }
            if core.is_closed() {
                self.inner.closed.store(true, Ordering::Release);
            }
            core.take_finished_watcher()
        };
        if let Some(watcher) = fired {
            watcher.envelope_closed();
        }
    }

    /// Evaluate a single instant, for hosts polling the envelope.
    pub fn value_at(&self, t: f64) -> f64 {
        let mut one = [0.0];
        self.render(&[t], &mut one, false);
        one[0]
    }
}
