use std::panic;
use std::time::{Duration, Instant};

use voice_clip::services::path_service;
use voice_clip::{
    is_playing, play_clip, stop_playback, CpalBackend, Recorder, SensitivityPreset,
    SensitivitySetting,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

const USAGE: &str = "\
usage: voice-clip <command>

  record <seconds> [preset]   record from the default microphone
  list                        list saved clips, newest first
  details <id>                decode a clip and print its waveform
  play <id>                   play a clip on the default output
  delete <id>                 delete a clip
  preset [name]               show or set the sensitivity preset
                              (low, medium, high, veryHigh)";

fn main() {
    env_logger::init();

    // Set a custom panic hook to handle ALSA thread panics gracefully
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let panic_msg = format!("{:?}", panic_info);
        if panic_msg.contains("get_htstamp") || panic_msg.contains("get_trigger_htstamp") {
            log::warn!("ALSA timing issue detected (known cpal bug), ignoring...");
            return;
        }
        default_hook(panic_info);
    }));

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(&args) {
        log::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> CliResult {
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let root = path_service::resolve_cache_root()?;
    path_service::ensure_cache_root(&root)?;
    let mut recorder = Recorder::open(&root, Box::new(CpalBackend::default()))?;

    match (command.as_str(), &args[1..]) {
        ("record", [secs, rest @ ..]) => {
            let secs: f64 = secs.parse().map_err(|_| format!("invalid duration: {}", secs))?;
            if let Some(name) = rest.first() {
                recorder.set_sensitivity(SensitivitySetting::Preset(parse_preset(name)?))?;
            }
            record(&mut recorder, Duration::from_secs_f64(secs.max(0.0)))
        }
        ("list", []) => {
            let clips = recorder.list_clips()?;
            println!("{}", serde_json::to_string_pretty(&clips)?);
            Ok(())
        }
        ("details", [id]) => {
            let clip = recorder
                .load_clip_details(id)?
                .ok_or_else(|| format!("no clip with id {}", id))?;
            if let Some(waveform) = &clip.waveform {
                println!("{}", render_bars(waveform));
            }
            println!("{}", serde_json::to_string_pretty(&clip)?);
            Ok(())
        }
        ("play", [id]) => {
            let clip = recorder
                .store()
                .find(id)?
                .ok_or_else(|| format!("no clip with id {}", id))?;
            let duration_ms = play_clip(&clip.path())?;
            let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);
            while is_playing() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(50));
            }
            stop_playback();
            Ok(())
        }
        ("delete", [id]) => {
            if recorder.delete_clip(id)? {
                println!("deleted {}", id);
            } else {
                println!("no clip with id {}", id);
            }
            Ok(())
        }
        ("preset", []) => {
            println!("{}", serde_json::to_string_pretty(&recorder.settings().sensitivity)?);
            Ok(())
        }
        ("preset", [name]) => {
            let preset = parse_preset(name)?;
            recorder.set_sensitivity(SensitivitySetting::Preset(preset))?;
            println!("sensitivity set to {}", preset.name());
            Ok(())
        }
        _ => Err(USAGE.into()),
    }
}

fn parse_preset(name: &str) -> Result<SensitivityPreset, String> {
    SensitivityPreset::from_name(name).ok_or_else(|| format!("unknown preset: {}", name))
}

fn record(recorder: &mut Recorder, length: Duration) -> CliResult {
    recorder.start_recording()?;
    let started = Instant::now();
    while started.elapsed() < length {
        std::thread::sleep(Duration::from_millis(100));
        eprint!(
            "\r{:>6} ms {}",
            recorder.elapsed_ms(),
            render_bars(&recorder.live_waveform())
        );
    }
    eprintln!();

    match recorder.stop_recording()? {
        Some(clip) => println!("{}", serde_json::to_string_pretty(&clip)?),
        None => println!("nothing was captured"),
    }
    Ok(())
}

fn render_bars(waveform: &[f32]) -> String {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    waveform
        .iter()
        .map(|&a| {
            let idx = (a.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
            LEVELS[idx.min(LEVELS.len() - 1)]
        })
        .collect()
}
