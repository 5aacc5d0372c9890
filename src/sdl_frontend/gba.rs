use crate::communication::{EmulatorNotification, EmulatorResponse};
use crossbeam::channel::*;
use rustyboi_advance::actions::{create_emulator, save_rom, save_state_path};
use rustyboi_advance_core::emulator::Emulator;
use rustyboi_advance_core::{EmulatorOptions, FRAMEBUFFER_SIZE};
use std::fs;
use std::path::Path;
use std::thread::JoinHandle;

/// The emulator runs on its own thread in lockstep with the renderer: one
/// converted frame in the bounded channel at a time.
pub struct GbaRunner {
    current_thread: Option<JoinHandle<()>>,
    pub frame_receiver: Receiver<Vec<u32>>,
    pub request_sender: Sender<EmulatorNotification>,
    pub response_receiver: Receiver<EmulatorResponse>,
}

impl GbaRunner {
    pub fn new(rom_path: impl AsRef<Path>, options: EmulatorOptions) -> anyhow::Result<GbaRunner> {
        let (frame_sender, frame_receiver) = bounded(1);
        let (request_sender, request_receiver) = unbounded::<EmulatorNotification>();
        let (response_sender, response_receiver) = unbounded::<EmulatorResponse>();
        let mut emulator = create_emulator(rom_path, options)?;
        let emulator_thread = std::thread::spawn(move || {
            run_emulator(&mut emulator, frame_sender, response_sender, request_receiver);
            save_rom(&emulator);
        });
        Ok(GbaRunner {
            current_thread: Some(emulator_thread),
            frame_receiver,
            request_sender,
            response_receiver,
        })
    }

    pub fn handle_input(&self, key: rustyboi_advance_core::InputKey, pressed: bool) {
        let notification = if pressed {
            EmulatorNotification::KeyDown(key)
        } else {
            EmulatorNotification::KeyUp(key)
        };
        if let Err(e) = self.request_sender.send(notification) {
            log::error!("Failed to send input to the emulator thread: {}", e);
        }
    }

    /// Stops the emulator thread and blocks until it has completed, which
    /// includes flushing battery memory to disk.
    pub fn stop(&mut self) {
        if let Some(thread) = self.current_thread.take() {
            let _ = self.request_sender.send(EmulatorNotification::ExitRequest);
            // The emulation thread may be blocking on handing us a frame.
            let _ = self.frame_receiver.try_recv();
            let _ = thread.join();
        }
    }
}

fn run_emulator(
    emulator: &mut Emulator,
    frame_sender: Sender<Vec<u32>>,
    response_sender: Sender<EmulatorResponse>,
    notification_receiver: Receiver<EmulatorNotification>,
) {
    let mut converted = vec![0u32; FRAMEBUFFER_SIZE];
    'emu_loop: loop {
        emulator.run_frame();
        if emulator.is_stopped() {
            log::info!("CPU entered stop mode, shutting the emulator thread down");
            break 'emu_loop;
        }

        emulator.convert_screen(&mut converted);
        if let Err(e) = frame_sender.send(converted.clone()) {
            log::error!("Failed to transfer framebuffer due to: {:?}", e);
            break 'emu_loop;
        }

        while let Ok(notification) = notification_receiver.try_recv() {
            match notification {
                EmulatorNotification::KeyDown(key) => emulator.handle_input(key, true),
                EmulatorNotification::KeyUp(key) => emulator.handle_input(key, false),
                EmulatorNotification::AudioRequest(mut audio_buffer) => {
                    audio_buffer.extend(emulator.audio_buffer().iter());
                    if let Err(e) = response_sender.send(EmulatorResponse::Audio(audio_buffer)) {
                        log::error!("Failed to transfer audio buffer due to: {:?}", e);
                        break 'emu_loop;
                    }
                    emulator.clear_audio_buffer();
                }
                EmulatorNotification::SaveState(slot) => {
                    let path = save_state_path(emulator.game_title(), slot);
                    if let Err(e) = fs::write(&path, emulator.save_state()) {
                        log::error!("Failed to write save state {:?}: {}", path, e);
                    } else {
                        log::info!("Wrote save state {:?}", path);
                    }
                }
                EmulatorNotification::LoadState(slot) => {
                    let path = save_state_path(emulator.game_title(), slot);
                    match fs::read(&path) {
                        Ok(blob) => {
                            if let Err(e) = emulator.load_state(&blob) {
                                log::error!("Corrupt save state {:?}: {:?}", path, e);
                            }
                        }
                        Err(e) => log::warn!("No save state at {:?}: {}", path, e),
                    }
                }
                EmulatorNotification::ExitRequest => {
                    break 'emu_loop;
                }
            }
        }

        // Periodically flush battery memory so a crash loses little.
        if emulator.save_dirty() {
            save_rom(emulator);
        }
    }
}
