use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;

use sfvoice::{write_wav, Renderer, SoundFont, Synthesizer};

/// how long to keep rendering after the script ends, if the script doesn't say
const DEFAULT_TAIL_SECONDS: f64 = 5.0;

#[derive(Parser, Debug)]
#[command(version, about = "Play a rhai script through a sound font and save the result as a WAV file")]
struct Args {
	/// script to run
	#[arg(default_value = "config.rhai")]
	script: PathBuf,
	/// output file (default: current date and time)
	#[arg(short, long)]
	output: Option<PathBuf>,
	#[arg(long, default_value_t = 44100)]
	sample_rate: u32,
}

struct Session {
	synth: Synthesizer,
	renderer: Arc<Renderer>,
	frames: Vec<f32>,
}

fn channel(channel: i64) -> usize {
	usize::try_from(channel).unwrap_or(usize::MAX)
}

fn midi_value(value: i64) -> u8 {
	value.clamp(0, 127) as u8
}

impl Session {
	fn new(sample_rate: u32) -> Self {
		let renderer = Arc::new(Renderer::new(sample_rate));
		let synth = Synthesizer::new(renderer.clone(), renderer.clock());
		Self {
			synth,
			renderer,
			frames: vec![],
		}
	}

	fn load_soundfont(&mut self, filename: &str) {
		match SoundFont::open(filename) {
			Ok(sf) => self.synth.load_soundfont(Arc::new(sf)),
			Err(e) => eprintln!("Couldn't open soundfont {}: {}", filename, e),
		}
	}

	fn print_presets(&self) {
		let Some(sf) = self.synth.soundfont() else {
			eprintln!("no soundfont loaded");
			return;
		};
		for (bank, programs) in sf.preset_names() {
			for (program, name) in programs {
				println!("{}:{}. {}", bank, program, name);
			}
		}
	}

	fn note_on(&mut self, ch: i64, key: i64, vel: i64) {
		if let Err(e) = self.synth.note_on(channel(ch), midi_value(key), midi_value(vel)) {
			log::error!("{}", e);
		}
	}

	fn render_seconds(&mut self, seconds: f64) {
		let frames = (seconds.max(0.0) * self.renderer.sample_rate() as f64) as usize;
		let start = self.frames.len();
		self.frames.resize(start + frames * 2, 0.0);
		self.renderer.render_into(&mut self.frames[start..]);
	}

	/// keep rendering until everything has died out, or `limit` seconds have passed
	fn render_tail(&mut self, limit: f64) {
		let step = 0.1;
		let mut rendered = 0.0;
		while rendered < limit && (self.synth.active_voice_count() > 0 || self.renderer.active_voices() > 0) {
			self.render_seconds(step);
			rendered += step;
		}
	}
}

fn tail_seconds(ast: &rhai::AST) -> f64 {
	let mut tail = DEFAULT_TAIL_SECONDS;
	for (name, _, value) in ast.iter_literal_variables(true, true) {
		if name == "SF_TAIL_SECONDS" {
			match value.as_int().map(|i| i as f64).or_else(|_| value.as_float()) {
				Ok(t) => tail = t,
				Err(t) => eprintln!("Warning: SF_TAIL_SECONDS should be a number, not {}.", t),
			}
		}
	}
	tail
}

fn main() {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let args = Args::parse();

	let session = Arc::new(Mutex::new(Session::new(args.sample_rate)));

	let mut engine = rhai::Engine::new();
	engine.set_max_expr_depths(0, 0);
	let s = session.clone();
	engine.register_fn("sf_load_soundfont", move |filename: &str| s.lock().load_soundfont(filename));
	let s = session.clone();
	engine.register_fn("sf_print_presets", move || s.lock().print_presets());
	let s = session.clone();
	engine.register_fn("sf_program", move |ch: i64, program: i64| {
		s.lock().synth.program_change(channel(ch), program.clamp(0, 127) as u16)
	});
	let s = session.clone();
	engine.register_fn("sf_bank", move |ch: i64, bank: i64| {
		s.lock().synth.bank_select(channel(ch), bank.clamp(0, 16383) as u16)
	});
	let s = session.clone();
	engine.register_fn("sf_percussion", move |ch: i64, on: bool| s.lock().synth.set_percussion(channel(ch), on));
	let s = session.clone();
	engine.register_fn("sf_note_on", move |ch: i64, key: i64, vel: i64| s.lock().note_on(ch, key, vel));
	let s = session.clone();
	engine.register_fn("sf_note_off", move |ch: i64, key: i64| s.lock().synth.note_off(channel(ch), midi_value(key)));
	let s = session.clone();
	engine.register_fn("sf_volume", move |ch: i64, volume: i64| {
		s.lock().synth.volume_change(channel(ch), midi_value(volume))
	});
	let s = session.clone();
	engine.register_fn("sf_pan", move |ch: i64, pan: i64| s.lock().synth.panpot_change(channel(ch), midi_value(pan)));
	let s = session.clone();
	engine.register_fn("sf_expression", move |ch: i64, expression: i64| {
		s.lock().synth.expression(channel(ch), midi_value(expression))
	});
	let s = session.clone();
	engine.register_fn("sf_pitch_bend", move |ch: i64, bend: i64| {
		s.lock().synth.pitch_bend(channel(ch), bend.clamp(-8192, 8191) as i16)
	});
	let s = session.clone();
	engine.register_fn("sf_bend_range", move |ch: i64, semitones: f64| {
		s.lock().synth.pitch_bend_sensitivity(channel(ch), semitones)
	});
	// allow integer semitones as well
	let s = session.clone();
	engine.register_fn("sf_bend_range", move |ch: i64, semitones: i64| {
		s.lock().synth.pitch_bend_sensitivity(channel(ch), semitones as f64)
	});
	let s = session.clone();
	engine.register_fn("sf_hold", move |ch: i64, down: bool| s.lock().synth.hold(channel(ch), down));
	let s = session.clone();
	engine.register_fn("sf_release_time", move |ch: i64, time: i64| {
		s.lock().synth.release_time(channel(ch), midi_value(time))
	});
	let s = session.clone();
	engine.register_fn("sf_mute", move |ch: i64, mute: bool| s.lock().synth.mute(channel(ch), mute));
	let s = session.clone();
	engine.register_fn("sf_all_sound_off", move |ch: i64| s.lock().synth.all_sound_off(channel(ch)));
	let s = session.clone();
	engine.register_fn("sf_reset_controllers", move |ch: i64| {
		s.lock().synth.reset_all_controllers(channel(ch))
	});
	let s = session.clone();
	engine.register_fn("sf_master_volume", move |volume: f64| s.lock().synth.set_master_volume(volume));
	let s = session.clone();
	engine.register_fn("sf_master_volume", move |volume: i64| {
		s.lock().synth.set_master_volume(volume as f64)
	});
	let s = session.clone();
	engine.register_fn("sf_wait", move |ms: i64| s.lock().render_seconds(ms as f64 / 1000.0));
	engine.register_fn("sf_print", |s: &str| {
		print!("{s}");
		if std::io::stdout().flush().is_err() {
			// whatever
		}
	});

	let engine = engine; // de-multablify
	let ast = match engine.compile_file(args.script.clone()) {
		Ok(x) => x,
		Err(e) => {
			eprintln!("Script error: {}", e);
			return;
		}
	};

	if let Err(e) = engine.run_ast(&ast) {
		eprintln!("Error running {}: {}", args.script.display(), e);
		return;
	}

	let mut session = session.lock();
	session.render_tail(tail_seconds(&ast));

	let output = args
		.output
		.unwrap_or_else(|| PathBuf::from(chrono::Local::now().format("%Y-%m-%d-%H-%M-%S.wav").to_string()));
	let seconds = session.frames.len() as f64 / 2.0 / args.sample_rate as f64;
	match write_wav(&output, &session.frames, args.sample_rate) {
		Ok(()) => log::info!("wrote {:.1}s of audio to {}", seconds, output.display()),
		Err(e) => eprintln!("Error writing {}: {}", output.display(), e),
	}
}
