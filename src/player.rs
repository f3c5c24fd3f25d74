use crate::engine::Synth;
use crate::engine::scheduler::{InputEvent, PlayerState, Scheduler};
use crate::engine::scoring::ScoreSnapshot;
use anyhow::{anyhow, bail};
use log::{debug, info, warn};
use serde::Serialize;
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::sync::mpsc::{Sender, TryRecvError};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMsg {
    Play,
    Pause,
    Stop,
    Seek(f64),
    SetRange(f64, f64),
    ClearRange,
    SetWait(bool),
    SetBpmModifier(f64),
    SetTrackSound(u32, bool),
    Input(InputEvent),
    Shutdown,
}

/// What a renderer polls each frame.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct PlayerStatus {
    pub time: f64,
    pub duration: f64,
    pub bpm: f64,
    pub playing: bool,
    pub state: PlayerState,
    pub score: ScoreSnapshot,
}

impl PlayerStatus {
    fn of<S: Synth>(scheduler: &Scheduler<S>) -> Self {
        Self {
            time: scheduler.get_time(),
            duration: scheduler.get_duration(),
            bpm: scheduler.get_bpm(),
            playing: scheduler.is_playing(),
            state: scheduler.state(),
            score: scheduler.score(),
        }
    }

    /// Paused at the very end of the song.
    pub fn finished(&self) -> bool {
        !self.playing && self.state != PlayerState::CannotPlay && self.time >= self.duration
    }
}

/// Runs a [`Scheduler`] on its own thread at a fixed tick rate. All mutation happens on that
/// thread; controls and input are queued and applied before the next tick.
#[derive(Debug)]
pub struct Player<S: Synth + 'static> {
    tick_hz: u32,
    status: Arc<Mutex<Option<PlayerStatus>>>,
    control_tx: Mutex<Option<Sender<ControlMsg>>>,
    worker_handle: Mutex<Option<JoinHandle<Scheduler<S>>>>,
}

/// Applies one control message. Returns false once the worker should exit.
fn apply<S: Synth>(scheduler: &mut Scheduler<S>, msg: ControlMsg) -> bool {
    match msg {
        ControlMsg::Play => scheduler.play(),
        ControlMsg::Pause => scheduler.pause(),
        ControlMsg::Stop => scheduler.stop(),
        ControlMsg::Seek(time) => scheduler.seek(time),
        ControlMsg::SetRange(start, end) => scheduler.set_range(start, end),
        ControlMsg::ClearRange => scheduler.clear_range(),
        ControlMsg::SetWait(wait) => scheduler.set_wait(wait),
        ControlMsg::SetBpmModifier(modifier) => scheduler.set_bpm_modifier(modifier),
        ControlMsg::SetTrackSound(track, on) => scheduler.set_track_sound(track, on),
        ControlMsg::Input(event) => {
            scheduler.handle_input(event);
        }
        ControlMsg::Shutdown => return false,
    }

    true
}

impl<S: Synth + 'static> Player<S> {
    pub fn new(tick_hz: u32) -> Self {
        Self {
            tick_hz,
            status: Arc::new(Mutex::new(None)),
            control_tx: Mutex::new(None),
            worker_handle: Mutex::new(None),
        }
    }

    /// Moves `scheduler` onto the playback thread.
    pub fn start(&self, mut scheduler: Scheduler<S>) -> anyhow::Result<()> {
        if self.tick_hz == 0 {
            bail!("Tick rate must be greater than 0..!")
        }

        let Ok(mut handle_lock) = self.worker_handle.lock() else {
            bail!("Failed to lock worker handle..!")
        };

        if handle_lock.is_some() {
            bail!("Playback already running..!")
        }

        {
            let Ok(mut status) = self.status.lock() else {
                bail!("Failed to lock status..!")
            };
            *status = Some(PlayerStatus::of(&scheduler));
        }

        let (tx, rx) = mpsc::channel::<ControlMsg>();
        {
            let Ok(mut ctl) = self.control_tx.lock() else {
                bail!("Failed to lock control_tx..!")
            };

            *ctl = Some(tx);
        }

        let status = Arc::clone(&self.status);
        let period = Duration::from_secs_f64(1.0 / self.tick_hz as f64);
        let handle = thread::spawn(move || {
            let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
            let mut last = Instant::now();
            debug!("Playback thread ticking every {:?}..!", period);

            'run: loop {
                loop {
                    match rx.try_recv() {
                        Ok(msg) => {
                            if !apply(&mut scheduler, msg) {
                                break 'run;
                            }
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            warn!("Control channel closed, stopping playback..!");
                            break 'run;
                        }
                    }
                }

                let now = Instant::now();
                scheduler.tick(now.duration_since(last).as_secs_f64());
                last = now;

                match status.lock() {
                    Ok(mut lock) => *lock = Some(PlayerStatus::of(&scheduler)),
                    Err(_) => warn!("Failed to lock status for publishing..!"),
                }

                sleeper.sleep(period);
            }

            scheduler.pause();
            info!("Playback thread finished..!");
            scheduler
        });

        *handle_lock = Some(handle);
        Ok(())
    }

    pub fn send(&self, msg: ControlMsg) -> anyhow::Result<()> {
        let Ok(lock) = self.control_tx.lock() else {
            bail!("Failed to lock control_tx..!")
        };

        let Some(tx) = lock.as_ref() else {
            bail!("No worker is running playback..!")
        };

        tx.send(msg)
            .map_err(|_| anyhow!("Playback thread is no longer receiving..!"))
    }

    /// A handle for input sources running on other threads.
    pub fn sender(&self) -> anyhow::Result<Sender<ControlMsg>> {
        let Ok(lock) = self.control_tx.lock() else {
            bail!("Failed to lock control_tx..!")
        };

        lock.clone()
            .ok_or_else(|| anyhow!("No worker is running playback..!"))
    }

    pub fn status(&self) -> anyhow::Result<PlayerStatus> {
        let Ok(lock) = self.status.lock() else {
            bail!("Failed to lock status..!")
        };

        lock.ok_or_else(|| anyhow!("Player has not been started..!"))
    }

    pub fn play(&self) -> anyhow::Result<()> {
        self.send(ControlMsg::Play)
    }

    pub fn pause(&self) -> anyhow::Result<()> {
        self.send(ControlMsg::Pause)
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        self.send(ControlMsg::Stop)
    }

    pub fn seek(&self, time: f64) -> anyhow::Result<()> {
        self.send(ControlMsg::Seek(time))
    }

    pub fn input(&self, event: InputEvent) -> anyhow::Result<()> {
        self.send(ControlMsg::Input(event))
    }

    /// Stops the playback thread and hands the scheduler back.
    pub fn shutdown(&self) -> anyhow::Result<Scheduler<S>> {
        let tx = {
            let Ok(mut lock) = self.control_tx.lock() else {
                bail!("Failed to lock control_tx..!")
            };
            lock.take()
        };

        let Some(tx) = tx else {
            bail!("No worker is running playback..!")
        };
        let _ = tx.send(ControlMsg::Shutdown);

        let Ok(mut lock) = self.worker_handle.lock() else {
            bail!("Failed to lock worker_handle..!")
        };

        let Some(handle) = lock.take() else {
            bail!("Playback thread is missing..!")
        };

        let scheduler = handle
            .join()
            .map_err(|_| anyhow!("Playback thread panicked..!"))?;
        debug!("Playback thread joined..!");

        Ok(scheduler)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::testing::RecordingSynth;
    use crate::model::config::SongConfig;
    use crate::model::song::{Song, SongParts, TickNote};

    fn short_song() -> Arc<Song> {
        Arc::new(Song::from_parts(SongParts {
            ppq: 480,
            notes: vec![
                TickNote {
                    track: 0,
                    midi_note: 60,
                    velocity: 90,
                    start_tick: 48,
                    end_tick: 240,
                },
                TickNote {
                    track: 0,
                    midi_note: 64,
                    velocity: 90,
                    start_tick: 96,
                    end_tick: 288,
                },
            ],
            ..Default::default()
        }))
    }

    #[test]
    fn plays_to_the_end_on_a_thread() {
        env_logger::try_init().unwrap_or(());

        let mut scheduler = Scheduler::new(RecordingSynth::default(), SongConfig::default());
        scheduler.set_song(short_song());

        let player = Player::new(1_000);
        assert!(player.status().is_err());
        assert!(player.play().is_err());

        player.start(scheduler).unwrap();
        assert!(player.start(Scheduler::new(RecordingSynth::default(), SongConfig::default())).is_err());
        assert_eq!(player.status().unwrap().state, PlayerState::Paused);

        player.play().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !player.status().unwrap().finished() {
            assert!(Instant::now() < deadline, "song never finished");
            spin_sleep::sleep(Duration::from_millis(5));
        }

        let status = player.status().unwrap();
        assert_eq!(status.time, status.duration);

        let scheduler = player.shutdown().unwrap();
        assert_eq!(scheduler.synth().plays(), vec![60, 64]);
        assert_eq!(scheduler.synth().stops(), vec![60, 64]);
        let score = scheduler.score();
        assert_eq!(score.perfect + score.good, 0);
        assert!(player.shutdown().is_err());
    }

    #[test]
    fn queued_input_is_scored() {
        let mut scheduler = Scheduler::new(RecordingSynth::default(), SongConfig::default());
        scheduler.set_song(short_song());

        let player = Player::new(500);
        player.start(scheduler).unwrap();
        player.play().unwrap();
        player.input(InputEvent::down(100, 90, 0.0)).unwrap();

        let sender = player.sender().unwrap();
        sender.send(ControlMsg::Pause).unwrap();

        let scheduler = player.shutdown().unwrap();
        assert_eq!(scheduler.score().error, 1);
        assert!(!scheduler.is_playing());
    }
}
