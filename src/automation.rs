//! parameter timelines.
//!
//! every automatable value of a voice (gain, cutoff, rate, pan...) is a `Curve`:
//! a starting value plus time-ordered breakpoints. the control side edits a private
//! copy and publishes it whole; the render side only ever evaluates the snapshot it
//! loaded, so it never sees half of a reschedule.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BreakpointKind {
	/// jump to the value at the breakpoint's time
	SetValue(f64),
	/// arrive at the value at the breakpoint's time, linearly from the previous breakpoint
	LinearRamp(f64),
	/// starting at the breakpoint's time, approach the value exponentially
	Target { value: f64, time_constant: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Breakpoint {
	/// seconds on the audio clock
	pub time: f64,
	pub kind: BreakpointKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Curve {
	initial: f64,
	events: Vec<Breakpoint>,
}

// what the curve is doing after the last breakpoint that has been passed
#[derive(Clone, Copy)]
enum State {
	Hold(f64),
	Approach {
		from: f64,
		since: f64,
		target: f64,
		time_constant: f64,
	},
}

impl State {
	fn at(self, t: f64) -> f64 {
		match self {
			State::Hold(v) => v,
			State::Approach {
				from,
				since,
				target,
				time_constant,
			} => {
				if time_constant <= 0.0 {
					target
				} else {
					target + (from - target) * f64::exp(-(t - since) / time_constant)
				}
			}
		}
	}
}

impl Curve {
	pub fn new(initial: f64) -> Self {
		Self {
			initial,
			events: vec![],
		}
	}

	pub fn initial(&self) -> f64 {
		self.initial
	}

	pub fn events(&self) -> &[Breakpoint] {
		&self.events
	}

	/// breakpoints at the same time keep the order they were added in
	pub fn insert(&mut self, breakpoint: Breakpoint) {
		let i = self.events.partition_point(|e| e.time <= breakpoint.time);
		self.events.insert(i, breakpoint);
	}

	pub fn set_value_at(&mut self, value: f64, time: f64) -> &mut Self {
		self.insert(Breakpoint {
			time,
			kind: BreakpointKind::SetValue(value),
		});
		self
	}

	pub fn linear_ramp_to(&mut self, value: f64, time: f64) -> &mut Self {
		self.insert(Breakpoint {
			time,
			kind: BreakpointKind::LinearRamp(value),
		});
		self
	}

	pub fn set_target_at(&mut self, value: f64, time: f64, time_constant: f64) -> &mut Self {
		self.insert(Breakpoint {
			time,
			kind: BreakpointKind::Target { value, time_constant },
		});
		self
	}

	/// drop every breakpoint at or after `time`
	pub fn cancel_scheduled_values(&mut self, time: f64) -> &mut Self {
		let i = self.events.partition_point(|e| e.time < time);
		self.events.truncate(i);
		self
	}

	/// freeze the curve at whatever value it has at `time`, dropping everything after.
	pub fn cancel_and_hold(&mut self, time: f64) -> &mut Self {
		let value = self.value_at(time);
		self.cancel_scheduled_values(time);
		self.set_value_at(value, time)
	}

	/// fold every breakpoint at or before `t` into at most two, keeping
	/// `value_at` the same from `t` on.
	pub fn prune_before(&mut self, t: f64) -> &mut Self {
		let passed = self.events.partition_point(|e| e.time <= t);
		if passed <= 2 {
			return self;
		}
		let (state, time) = self.state_after(&self.events[..passed]);
		let folded = match state {
			State::Hold(value) => vec![Breakpoint {
				time,
				kind: BreakpointKind::SetValue(value),
			}],
			State::Approach {
				from,
				since,
				target,
				time_constant,
			} => vec![
				Breakpoint {
					time: since,
					kind: BreakpointKind::SetValue(from),
				},
				Breakpoint {
					time: since,
					kind: BreakpointKind::Target { value: target, time_constant },
				},
			],
		};
		self.events.splice(..passed, folded);
		self
	}

	// state after running through `events`, and the time of the last one
	fn state_after(&self, events: &[Breakpoint]) -> (State, f64) {
		let mut state = State::Hold(self.initial);
		let mut time = 0.0;
		for e in events {
			state = Self::step(state, e);
			time = e.time;
		}
		(state, time)
	}

	fn step(state: State, e: &Breakpoint) -> State {
		match e.kind {
			BreakpointKind::SetValue(v) | BreakpointKind::LinearRamp(v) => State::Hold(v),
			BreakpointKind::Target { value, time_constant } => State::Approach {
				from: state.at(e.time),
				since: e.time,
				target: value,
				time_constant,
			},
		}
	}

	pub fn value_at(&self, t: f64) -> f64 {
		let mut state = State::Hold(self.initial);
		// (time, value) of the last breakpoint passed, where a ramp would start from
		let mut last: Option<(f64, f64)> = None;
		for e in self.events.iter() {
			if e.time > t {
				if let (BreakpointKind::LinearRamp(to), Some((t0, v0))) = (e.kind, last) {
					let span = e.time - t0;
					if span > 0.0 {
						return v0 + (to - v0) * (t - t0) / span;
					}
				}
				break;
			}
			let value = match e.kind {
				BreakpointKind::SetValue(v) | BreakpointKind::LinearRamp(v) => {
					state = State::Hold(v);
					v
				}
				BreakpointKind::Target { value, time_constant } => {
					let from = state.at(e.time);
					state = State::Approach {
						from,
						since: e.time,
						target: value,
						time_constant,
					};
					from
				}
			};
			last = Some((e.time, value));
		}
		state.at(t)
	}
}

/// a curve shared between the control side (writes) and the render side (reads).
#[derive(Debug)]
pub struct Automation {
	curve: ArcSwap<Curve>,
}

impl Automation {
	pub fn new(initial: f64) -> Self {
		Self {
			curve: ArcSwap::from_pointee(Curve::new(initial)),
		}
	}

	pub fn snapshot(&self) -> Arc<Curve> {
		self.curve.load_full()
	}

	pub fn value_at(&self, t: f64) -> f64 {
		self.curve.load().value_at(t)
	}

	/// edit a copy of the curve, then publish it in one store.
	pub fn update(&self, edit: impl FnOnce(&mut Curve)) {
		let mut curve = Curve::clone(&self.curve.load());
		edit(&mut curve);
		self.curve.store(Arc::new(curve));
	}
}

/// the one time source everything is scheduled against.
pub trait AudioClock: Send + Sync {
	/// seconds; never goes backwards
	fn now(&self) -> f64;
}

/// a clock that moves forward as frames are rendered.
#[derive(Debug)]
pub struct SampleClock {
	frames: AtomicU64,
	sample_rate: u32,
}

impl SampleClock {
	pub fn new(sample_rate: u32) -> Self {
		Self {
			frames: AtomicU64::new(0),
			sample_rate,
		}
	}

	pub fn sample_rate(&self) -> u32 {
		self.sample_rate
	}

	pub fn frames(&self) -> u64 {
		self.frames.load(Ordering::Acquire)
	}

	pub fn advance(&self, frames: u64) {
		self.frames.fetch_add(frames, Ordering::AcqRel);
	}
}

impl AudioClock for SampleClock {
	fn now(&self) -> f64 {
		self.frames() as f64 / self.sample_rate as f64
	}
}
