//! Progress reporting for long-running shatter loops.
//!
//! `get_progress_bar` returns a terminal progress bar when stderr is a
//! terminal and a silent drain otherwise (tests always get the drain).

use std::io::{Write, stderr};
use std::time::Instant;

/// Factory for a progress indicator.
pub fn get_progress_bar(message: &str, max_value: u64) -> Box<dyn ProgressTrait> {
	#[cfg(not(test))]
	{
		use std::io::IsTerminal;
		if stderr().is_terminal() {
			let mut progress = ProgressBar::new();
			progress.init(message, max_value);
			return Box::new(progress);
		}
	}
	let mut progress = ProgressDrain::new();
	progress.init(message, max_value);
	Box::new(progress)
}

/// A progress indicator driven by the coordinator.
pub trait ProgressTrait: Send + Sync {
	fn new() -> Self
	where
		Self: Sized;

	/// Initializes the indicator with a task message and a maximum value.
	fn init(&mut self, message: &str, max_value: u64);

	/// Sets the absolute position.
	fn set_position(&mut self, value: u64);

	/// Increases the position by `value`.
	fn inc(&mut self, value: u64);

	/// Finishes the indicator, drawing the final state.
	fn finish(&mut self);
}

/// Progress bar writing to stderr.
pub struct ProgressBar {
	message: String,
	max_value: u64,
	value: u64,
	start: Instant,
	last_draw: Instant,
}

impl ProgressBar {
	fn draw(&mut self, force: bool) {
		// redraw at most every 100ms
		if !force && self.last_draw.elapsed().as_millis() < 100 {
			return;
		}
		self.last_draw = Instant::now();

		let percent = if self.max_value == 0 {
			100.0
		} else {
			self.value as f64 * 100.0 / self.max_value as f64
		};
		let elapsed = self.start.elapsed().as_secs_f64();
		let rate = if elapsed > 0.0 { self.value as f64 / elapsed } else { 0.0 };
		let _ = write!(
			stderr(),
			"\r{}: {}/{} ({percent:.1}%) {rate:.1}/s",
			self.message, self.value, self.max_value
		);
		let _ = stderr().flush();
	}
}

impl ProgressTrait for ProgressBar {
	fn new() -> Self {
		ProgressBar {
			message: String::new(),
			max_value: 0,
			value: 0,
			start: Instant::now(),
			last_draw: Instant::now(),
		}
	}

	fn init(&mut self, message: &str, max_value: u64) {
		self.message = message.to_string();
		self.max_value = max_value;
		self.start = Instant::now();
		self.draw(true);
	}

	fn set_position(&mut self, value: u64) {
		self.value = value.min(self.max_value);
		self.draw(false);
	}

	fn inc(&mut self, value: u64) {
		self.set_position(self.value + value);
	}

	fn finish(&mut self) {
		self.draw(true);
		let _ = writeln!(stderr());
	}
}

/// Silent progress indicator that only logs the task boundaries.
pub struct ProgressDrain {
	message: String,
	value: u64,
}

impl ProgressTrait for ProgressDrain {
	fn new() -> Self {
		ProgressDrain {
			message: String::new(),
			value: 0,
		}
	}

	fn init(&mut self, message: &str, max_value: u64) {
		self.message = message.to_string();
		log::debug!("{}: 0/{max_value}", self.message);
	}

	fn set_position(&mut self, value: u64) {
		self.value = value;
	}

	fn inc(&mut self, value: u64) {
		self.value += value;
	}

	fn finish(&mut self) {
		log::debug!("{}: finished at {}", self.message, self.value);
	}
}
