use cfg_if::cfg_if;
use log::warn;
use nalgebra::{Point3, Vector3, Vector4};
use wgpu::SurfaceError;
use winit::event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::{CursorGrabMode, WindowBuilder};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

use crate::app::Application;
use crate::camera::Camera;
use crate::ember::scene::{Material, Scene, Sphere};
use crate::ember::Ember;

pub mod app;
pub mod camera;
pub mod ember;
pub mod texture;
pub mod util;

cfg_if! {
    if #[cfg(target_arch = "wasm32")] {
        use web_time::Instant;
    } else {
        use std::time::Instant;
    }
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen(start))]
pub async fn run() {
    cfg_if! {
        if #[cfg(target_arch = "wasm32")] {
            std::panic::set_hook(Box::new(console_error_panic_hook::hook));
            console_log::init_with_level(log::Level::Debug).expect("no browser console logger");
        } else {
            env_logger::init();
        }
    }

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("Ember: Path Tracer")
        .build(&event_loop)
        .unwrap();

    #[cfg(target_arch = "wasm32")]
    {
        // winit creates the canvas but nothing puts it in the page.
        use winit::dpi::PhysicalSize;
        use winit::platform::web::WindowExtWebSys;

        window.set_inner_size(PhysicalSize::new(900, 600));
        web_sys::window()
            .and_then(|browser| browser.document())
            .and_then(|document| {
                let host = document.get_element_by_id("ember")?;
                host.append_child(&web_sys::Element::from(window.canvas())).ok()?;
                Some(())
            })
            .expect("no #ember element to attach the canvas to");
    }

    let mut app = Application::new(window, &event_loop).await;
    let mut ember = Ember::new(app.size);
    let mut scene = demo_scene();
    let mut camera = Camera::new(
        45.0_f32.to_radians(),
        0.1,
        100.0,
        Point3::new(0.0, 0.0, 6.0),
        -Vector3::z_axis(),
        app.size,
    );

    let mut last_frame = Instant::now();
    let mut grabbed = false;

    event_loop.run(move |event, _, control_flow| match event {
        Event::WindowEvent {
            ref event,
            window_id,
        } if window_id == app.window.id() => {
            let consumed = app.input(event);

            match event {
                WindowEvent::CloseRequested
                | WindowEvent::KeyboardInput {
                    input:
                        KeyboardInput {
                            state: ElementState::Pressed,
                            virtual_keycode: Some(VirtualKeyCode::Escape),
                            ..
                        },
                    ..
                } => *control_flow = ControlFlow::ExitWithCode(0),

                WindowEvent::Resized(new_size) => {
                    app.resize(*new_size);
                    ember.resize(*new_size);
                    camera.resize(*new_size);
                    ember.reset_counter();
                }
                WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                    app.resize(**new_inner_size);
                    ember.resize(**new_inner_size);
                    camera.resize(**new_inner_size);
                    ember.reset_counter();
                }

                event if !consumed => {
                    if camera.input(event, app.wants_pointer()) {
                        ember.reset_counter();
                    }
                }
                _ => {}
            }
        }

        Event::RedrawRequested(window_id) if window_id == app.window.id() => {
            let now = Instant::now();
            let frame_seconds = (now - last_frame).as_secs_f32();
            last_frame = now;

            if camera.update(frame_seconds) {
                ember.reset_counter();
            }

            if camera.grab_mouse != grabbed {
                grabbed = camera.grab_mouse;
                let mode = if grabbed {
                    CursorGrabMode::Confined
                } else {
                    CursorGrabMode::None
                };
                app.window.set_cursor_visible(!grabbed);
                if let Err(error) = app.window.set_cursor_grab(mode) {
                    warn!("cursor grab unavailable: {error}");
                }
            }

            match app.render(&mut ember, &mut scene, &camera, frame_seconds * 1000.0) {
                Ok(()) => {}
                // Reconfiguring the surface recovers both of these.
                Err(SurfaceError::Lost | SurfaceError::Outdated) => app.resize(app.size),
                Err(SurfaceError::OutOfMemory) => *control_flow = ControlFlow::ExitWithCode(1),
                Err(error) => warn!("surface error: {error:?}"),
            }
        }

        Event::MainEventsCleared => app.window.request_redraw(),
        _ => {}
    });
}

/// Three spheres under the default direct light: a mirror-smooth magenta
/// ball, an emissive orange one and a large floor sphere.
pub fn demo_scene() -> Scene {
    Scene {
        spheres: vec![
            Sphere {
                position: Vector3::zeros(),
                radius: 1.0,
                material_index: 0,
            },
            Sphere {
                position: Vector3::new(2.0, 0.0, 0.0),
                radius: 1.0,
                material_index: 2,
            },
            Sphere {
                position: Vector3::new(0.0, -101.0, 0.0),
                radius: 100.0,
                material_index: 1,
            },
        ],
        materials: vec![
            Material {
                albedo: Vector3::new(1.0, 0.0, 1.0),
                roughness: 0.0,
                ..Default::default()
            },
            Material {
                albedo: Vector3::new(0.2, 0.3, 1.0),
                roughness: 0.1,
                ..Default::default()
            },
            Material {
                albedo: Vector3::new(0.8, 0.5, 0.2),
                roughness: 0.1,
                emission_color: Vector3::new(0.8, 0.5, 0.2),
                emission_power: 2.0,
            },
        ],
    }
}

/// Clamps a linear color to [0, 1] and packs it as 0xAABBGGRR, red in the
/// low byte. Matches Rgba8 texel memory on little-endian hosts.
pub fn vec4_to_rgba(color: &Vector4<f32>) -> u32 {
    let r = (color.x.clamp(0.0, 1.0) * 255.0) as u32;
    let g = (color.y.clamp(0.0, 1.0) * 255.0) as u32;
    let b = (color.z.clamp(0.0, 1.0) * 255.0) as u32;
    let a = (color.w.clamp(0.0, 1.0) * 255.0) as u32;

    (a << 24) | (b << 16) | (g << 8) | r
}
