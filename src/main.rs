use SIGHT_READ::{
    Args, InputEvent, LoggingSynth, Player, PlayerConfig, Scheduler, export_midi_file,
    format_time, import_midi_file,
};
use anyhow::Result;
use clap::Parser;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    config.apply_args(&args);
    debug!("Using config: {:?}", config);

    info!("Importing MIDI file: '{}'...", args.midi.display());
    let song = import_midi_file(&args.midi)?;

    info!(
        "Imported {} notes over {} tracks, {} measures in {}/{} ({}), {}..!",
        song.notes.len(),
        song.tracks.len(),
        song.measures.len(),
        song.time_signature.numerator,
        song.time_signature.denominator,
        song.key_signature.as_deref().unwrap_or("no key"),
        format_time(song.duration)
    );

    if let Some(path) = args.export.as_ref() {
        export_midi_file(&song, path)?;
        info!("Exported song to '{}'..!", path.display());
    }

    if args.dry_run {
        info!("Previewing at most {} notes..!", args.dry_run_max);
        for (i, note) in song.notes.iter().take(args.dry_run_max).enumerate() {
            let hand = if config.song.is_active_track(note.track) {
                "player"
            } else {
                "backing"
            };

            info!(
                "Note {:>4}: midi={:>3} track={:>2} ({}) at {} for {:.3}s in measure {}",
                i,
                note.midi_note,
                note.track,
                hand,
                format_time(note.time),
                note.duration,
                note.measure + 1
            );
        }
        return Ok(());
    }

    let song = Arc::new(song);
    let mut scheduler = Scheduler::from_config(LoggingSynth::new(args.verbose), &config);
    scheduler.set_song(Arc::clone(&song));
    if let Some((start, end)) = config.range {
        scheduler.set_range(start, end);
        scheduler.seek(start);
    }

    let verbose = args.verbose;
    scheduler.scoring_mut().subscribe(move |score| {
        if verbose {
            debug!(
                "Score: {} | perfect {} good {} missed {} error {} | streak {}",
                score.combined, score.perfect, score.good, score.missed, score.error, score.streak
            );
        }
    });

    let player = Player::new(config.tick_hz);
    player.start(scheduler)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        warn!("Ctrl-C received, stopping playback..!");
        flag.store(true, Ordering::SeqCst);
    })?;

    player.play()?;

    // Autoplay presses each player note as it comes due.
    let mut last_time = player.status()?.time;
    let mut cursor = song.notes.partition_point(|n| n.time < last_time);
    let mut releases: Vec<(f64, u8)> = Vec::new();

    loop {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }

        let status = player.status()?;
        if status.finished() {
            info!("Playback finished..!");
            break;
        }

        if args.autoplay {
            if status.time < last_time {
                cursor = song.notes.partition_point(|n| n.time < status.time);
                releases.clear();
            }
            last_time = status.time;

            while let Some(note) = song.notes.get(cursor) {
                if note.time > status.time {
                    break;
                }
                if config.song.is_active_track(note.track) {
                    player.input(InputEvent::down(note.midi_note, note.velocity, status.time))?;
                    releases.push((note.end(), note.midi_note));
                }
                cursor += 1;
            }

            for &(_, midi) in releases.iter().filter(|(end, _)| *end <= status.time) {
                player.input(InputEvent::up(midi, status.time))?;
            }
            releases.retain(|(end, _)| *end > status.time);
        }

        spin_sleep::sleep(Duration::from_millis(2));
    }

    let scheduler = player.shutdown()?;
    let score = scheduler.score();
    info!(
        "Final score: {} | accuracy {:.1}% | perfect {} good {} missed {} error {}",
        score.combined, score.accuracy, score.perfect, score.good, score.missed, score.error
    );
    debug!(
        "Synth played {} notes at {}..!",
        scheduler.synth().notes_played(),
        format_time(scheduler.get_time())
    );

    Ok(())
}
