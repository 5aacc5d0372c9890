use anyhow::Context;
use gumdrop::Options;
use log::LevelFilter;
use once_cell::sync::Lazy;
use simplelog::{Config, TermLogger, TerminalMode};

use sdl2::audio::{AudioQueue, AudioSpecDesired};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;

use rustyboi_advance::actions::load_bios;
use rustyboi_advance::storage::{FileStorage, Storage};
use rustyboi_advance_core::{EmulatorOptionsBuilder, InputKey, DISPLAY_HEIGHT, DISPLAY_WIDTH};

use crate::communication::{EmulatorNotification, EmulatorResponse};
use crate::gba::GbaRunner;
use crate::options::AppOptions;
use crate::state::{AppEmulatorState, AppState};

use std::time::{Duration, Instant};

mod communication;
mod gba;
mod options;
mod state;

const CONFIG_FILENAME: &str = "config.json";
const FPS: u64 = 60;
const FRAME_DELAY: Duration = Duration::from_nanos(1_000_000_000u64 / FPS);
const SAMPLE_RATE: u32 = 44_100;
/// Do not let the audio queue run away when fast forwarding.
const MAX_AUDIO_SAMPLES: u32 = 70_000;

static KEYMAP: Lazy<Vec<(Keycode, InputKey)>> = Lazy::new(|| {
    vec![
        (Keycode::X, InputKey::A),
        (Keycode::Z, InputKey::B),
        (Keycode::Backspace, InputKey::Select),
        (Keycode::Return, InputKey::Start),
        (Keycode::Right, InputKey::Right),
        (Keycode::Left, InputKey::Left),
        (Keycode::Up, InputKey::Up),
        (Keycode::Down, InputKey::Down),
        (Keycode::S, InputKey::R),
        (Keycode::A, InputKey::L),
    ]
});

fn main() -> anyhow::Result<()> {
    TermLogger::init(LevelFilter::Info, Config::default(), TerminalMode::Mixed)
        .context("Failed to initialise the logger")?;

    let options: AppOptions = AppOptions::parse_args_default_or_exit();
    let rom_path = options
        .rom_path
        .clone()
        .context("No ROM provided, pass one as the first argument")?;

    let file_storage = FileStorage::new().context("Could not create the config directories")?;
    let mut app_state: AppState = file_storage.get_value(CONFIG_FILENAME).unwrap_or_default();
    // Command line flags win over the persisted configuration.
    app_state.uncapped_speed |= options.uncapped_speed;
    app_state.color_filter |= options.color_filter;
    if options.scale != 3 {
        app_state.scale = options.scale;
    }

    let bios = match &options.bios {
        Some(path) => Some(load_bios(path)?),
        None => None,
    };
    let boot_bios = bios.is_some() && !options.skip_bios;
    let emu_options = EmulatorOptionsBuilder::new()
        .bios(bios)
        .boot_bios(boot_bios)
        .sample_rate(SAMPLE_RATE)
        .color_filter(app_state.color_filter)
        .build();

    let sdl_context = sdl2::init().map_err(anyhow::Error::msg)?;
    let video_subsystem = sdl_context.video().map_err(anyhow::Error::msg)?;
    let audio_subsystem = sdl_context.audio().map_err(anyhow::Error::msg)?;

    let window = video_subsystem
        .window(
            "Rustyboi Advance",
            DISPLAY_WIDTH as u32 * app_state.scale,
            DISPLAY_HEIGHT as u32 * app_state.scale,
        )
        .position_centered()
        .resizable()
        .build()?;
    let mut canvas = window.into_canvas().accelerated().build()?;
    let texture_creator = canvas.texture_creator();
    let mut texture = texture_creator.create_texture_streaming(
        PixelFormatEnum::ARGB8888,
        DISPLAY_WIDTH as u32,
        DISPLAY_HEIGHT as u32,
    )?;

    let audio_queue: AudioQueue<f32> = audio_subsystem
        .open_queue(
            None,
            &AudioSpecDesired {
                freq: Some(SAMPLE_RATE as i32),
                channels: Some(2),
                samples: None,
            },
        )
        .map_err(anyhow::Error::msg)?;
    audio_queue.resume();

    let mut gba_runner = GbaRunner::new(&rom_path, emu_options)?;
    let mut event_pump = sdl_context.event_pump().map_err(anyhow::Error::msg)?;
    let mut emulation_state = AppEmulatorState::default();
    let mut audio_buffer: Vec<f32> = Vec::with_capacity(8192);
    let mut last_frame_time = Instant::now();

    'mainloop: loop {
        if !emulation_state.awaiting_audio && audio_queue.size() < MAX_AUDIO_SAMPLES {
            let request = EmulatorNotification::AudioRequest(audio_buffer);
            audio_buffer = Vec::new();
            if gba_runner.request_sender.send(request).is_ok() {
                emulation_state.awaiting_audio = true;
            }
        }

        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => break 'mainloop,
                Event::KeyDown {
                    keycode: Some(key), ..
                } => match key {
                    Keycode::Escape => break 'mainloop,
                    Keycode::F1 => {
                        let _ = gba_runner.request_sender.send(EmulatorNotification::SaveState(1));
                    }
                    Keycode::F2 => {
                        let _ = gba_runner.request_sender.send(EmulatorNotification::LoadState(1));
                    }
                    _ => {
                        if let Some(input) = to_input_key(key) {
                            gba_runner.handle_input(input, true);
                        }
                    }
                },
                Event::KeyUp {
                    keycode: Some(key), ..
                } => {
                    if let Some(input) = to_input_key(key) {
                        gba_runner.handle_input(input, false);
                    }
                }
                _ => {}
            }
        }

        // Block for the next frame from the emulator thread.
        let frame = match gba_runner.frame_receiver.recv() {
            Ok(frame) => frame,
            Err(_) => {
                log::info!("Emulator thread went away, exiting");
                break 'mainloop;
            }
        };

        while let Ok(response) = gba_runner.response_receiver.try_recv() {
            match response {
                EmulatorResponse::Audio(samples) => {
                    let _ = audio_queue.queue(&samples);
                    audio_buffer = samples;
                    audio_buffer.clear();
                    emulation_state.awaiting_audio = false;
                }
            }
        }

        texture.update(
            None,
            as_byte_slice(&frame),
            DISPLAY_WIDTH * std::mem::size_of::<u32>(),
        )?;
        canvas.clear();
        canvas.copy(&texture, None, None).map_err(anyhow::Error::msg)?;
        canvas.present();

        if !app_state.uncapped_speed {
            let elapsed = last_frame_time.elapsed();
            if elapsed < FRAME_DELAY {
                std::thread::sleep(FRAME_DELAY - elapsed);
            }
        }
        last_frame_time = Instant::now();
    }

    emulation_state.exiting = true;
    gba_runner.stop();
    if let Err(e) = file_storage.save_value(CONFIG_FILENAME, &app_state) {
        log::warn!("Could not persist the configuration: {}", e);
    }
    Ok(())
}

fn to_input_key(keycode: Keycode) -> Option<InputKey> {
    KEYMAP.iter().find(|(key, _)| *key == keycode).map(|(_, input)| *input)
}

/// View the XRGB frame as raw bytes for the texture upload.
fn as_byte_slice(frame: &[u32]) -> &[u8] {
    // Safety: u32 -> u8 reinterpretation with the length scaled accordingly.
    unsafe { std::slice::from_raw_parts(frame.as_ptr() as *const u8, frame.len() * 4) }
}
