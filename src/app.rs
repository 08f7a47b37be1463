use std::iter;

use eframe::egui::{ClippedPrimitive, ComboBox, DragValue, Slider, TextureId};
use nalgebra::Vector3;
use wgpu::{
    Backends, Color, CommandEncoder, CommandEncoderDescriptor, CompositeAlphaMode, Device,
    DeviceDescriptor, Dx12Compiler, Features, FilterMode, Instance, InstanceDescriptor, Limits,
    LoadOp, Operations, PowerPreference, PresentMode, Queue, RenderPassColorAttachment,
    RenderPassDescriptor, RequestAdapterOptions, Surface, SurfaceConfiguration, SurfaceError,
    TextureUsages, TextureViewDescriptor,
};
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::EventLoop;
use winit::window::Window;

use crate::ember::scene::Scene;
use crate::ember::{Ember, RenderMode};
use crate::camera::Camera;
use crate::texture::Image;

pub struct Application {
    surface: Surface,
    device: Device,
    queue: Queue,
    config: SurfaceConfiguration,
    pub size: PhysicalSize<u32>,
    pub window: Window,
    egui_state: egui_winit::State,
    egui_context: eframe::egui::Context,
    egui_renderer: egui_wgpu::Renderer,
    egui_screen: egui_wgpu::renderer::ScreenDescriptor,
    trace_image: Image,
    trace_texture_id: TextureId,
    saved_frames: u32,
}

impl Application {
    pub async fn new(window: Window, event_loop: &EventLoop<()>) -> Self {
        let size = window.inner_size();

        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            dx12_shader_compiler: Dx12Compiler::default(),
        });

        // The window outlives the surface; both live in Self.
        let surface = unsafe { instance.create_surface(&window) }.unwrap();

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::default(),
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            })
            .await
            .unwrap();

        let info = adapter.get_info();
        log::info!("presenting with {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    features: Features::empty(),
                    limits: if cfg!(target_arch = "wasm32") {
                        Limits::downlevel_webgl2_defaults()
                    } else {
                        Limits::default()
                    },
                    label: Some("Ember GPU"),
                },
                None,
            )
            .await
            .unwrap();

        let capabilities = surface.get_capabilities(&adapter);

        // Prefer an sRGB swapchain; the traced image is stored as sRGB too.
        let surface_format = capabilities
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .copied()
            .unwrap_or(capabilities.formats[0]);
        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: PresentMode::AutoVsync,
            alpha_mode: CompositeAlphaMode::Auto,
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let egui_state = egui_winit::State::new(event_loop);
        let egui_context = eframe::egui::Context::default();

        let mut egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1);
        let egui_screen = egui_wgpu::renderer::ScreenDescriptor {
            size_in_pixels: [config.width, config.height],
            pixels_per_point: egui_context.pixels_per_point(),
        };

        // Nearest filtering so accumulation noise is visible pixel for pixel.
        let trace_image = Image::new(&device, size.width, size.height, "trace output");
        let trace_texture_id = egui_renderer.register_native_texture(
            &device,
            &trace_image.view,
            FilterMode::Nearest,
        );

        Self {
            surface,
            device,
            queue,
            config,
            size,
            window,
            egui_state,
            egui_context,
            egui_renderer,
            egui_screen,
            trace_image,
            trace_texture_id,
            saved_frames: 0,
        }
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }

        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);

        self.egui_screen.pixels_per_point = self.egui_context.pixels_per_point();
        self.egui_screen.size_in_pixels = [self.config.width, self.config.height];
    }

    /// Traces one pass, uploads it and presents it behind the control panel.
    pub fn render(
        &mut self,
        ember: &mut Ember,
        scene: &mut Scene,
        camera: &Camera,
        frame_ms: f32,
    ) -> Result<(), SurfaceError> {
        // A minimized window has no pixels to trace or to present into.
        let size = ember.size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }

        ember.render(scene, camera);

        if self.trace_image.resize(&self.device, ember.size()) {
            self.egui_renderer.free_texture(&self.trace_texture_id);
            self.trace_texture_id = self.egui_renderer.register_native_texture(
                &self.device,
                &self.trace_image.view,
                FilterMode::Nearest,
            );
        }
        self.trace_image.upload(&self.queue, ember.final_image_data());

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Encoder"),
            });

        let (primitives, freed) = self.update_egui(&mut encoder, ember, scene, frame_ms);
        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color {
                            r: 0.0,
                            g: 0.0,
                            b: 0.0,
                            a: 1.0,
                        }),
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });

            self.egui_renderer
                .render(&mut render_pass, &primitives, &self.egui_screen);
        }

        self.queue.submit(iter::once(encoder.finish()));
        output.present();

        // Textures egui retired this frame may only be dropped after the
        // pass that sampled them was submitted.
        for id in &freed {
            self.egui_renderer.free_texture(id);
        }

        Ok(())
    }

    // true: egui consumed the event, nothing left for the event loop.
    pub fn input(&mut self, event: &WindowEvent) -> bool {
        self.egui_state.on_event(&self.egui_context, event).consumed
    }

    pub fn wants_pointer(&self) -> bool {
        self.egui_context.is_pointer_over_area() || self.egui_context.wants_pointer_input()
    }

    fn update_egui(
        &mut self,
        encoder: &mut CommandEncoder,
        ember: &mut Ember,
        scene: &mut Scene,
        frame_ms: f32,
    ) -> (Vec<ClippedPrimitive>, Vec<TextureId>) {
        let trace_texture = self.trace_texture_id;
        let mut save_requested = false;

        let egui_input = self.egui_state.take_egui_input(&self.window);
        let egui_output = self.egui_context.run(egui_input, |ctx| {
            eframe::egui::SidePanel::right("controls")
                .resizable(true)
                .default_width(220.0)
                .show(ctx, |ui| {
                    ui.label(format!("frame time: {frame_ms:.1} ms"));
                    ui.label(format!(
                        "accumulated frames: {}",
                        ember.frame_index().saturating_sub(1).max(1)
                    ));
                    ui.label("WASD + mouse to fly, C to toggle grab");
                    ui.separator();

                    let mut needs_reset = false;

                    ui.checkbox(&mut ember.settings.should_accumulate, "accumulate");
                    needs_reset |= ui
                        .checkbox(&mut ember.settings.slow_random, "thread rng jitter")
                        .changed();

                    ComboBox::from_label("mode")
                        .selected_text(match ember.settings.mode {
                            RenderMode::DirectLight => "direct light",
                            RenderMode::Emission => "emission",
                        })
                        .show_ui(ui, |ui| {
                            needs_reset |= ui
                                .selectable_value(
                                    &mut ember.settings.mode,
                                    RenderMode::DirectLight,
                                    "direct light",
                                )
                                .changed();
                            needs_reset |= ui
                                .selectable_value(
                                    &mut ember.settings.mode,
                                    RenderMode::Emission,
                                    "emission",
                                )
                                .changed();
                        });

                    if ui.button("reset accumulation").clicked() {
                        needs_reset = true;
                    }
                    if !cfg!(target_arch = "wasm32") && ui.button("save png").clicked() {
                        save_requested = true;
                    }

                    ui.separator();
                    for (index, sphere) in scene.spheres.iter_mut().enumerate() {
                        ui.push_id(("sphere", index), |ui| {
                            ui.label(format!("sphere {index}"));
                            ui.horizontal(|ui| {
                                // Labels pair up with the x, y, z storage order.
                                for (axis, value) in
                                    ["x", "y", "z"].into_iter().zip(sphere.position.iter_mut())
                                {
                                    needs_reset |= ui
                                        .add(DragValue::new(value).speed(0.05).prefix(axis))
                                        .changed();
                                }
                            });
                            needs_reset |= ui
                                .add(DragValue::new(&mut sphere.radius).speed(0.05).prefix("r "))
                                .changed();
                        });
                    }

                    ui.separator();
                    for (index, material) in scene.materials.iter_mut().enumerate() {
                        ui.push_id(("material", index), |ui| {
                            ui.label(format!("material {index}"));

                            let mut albedo =
                                [material.albedo.x, material.albedo.y, material.albedo.z];
                            if ui.color_edit_button_rgb(&mut albedo).changed() {
                                material.albedo = Vector3::from(albedo);
                                needs_reset = true;
                            }

                            needs_reset |= ui
                                .add(Slider::new(&mut material.roughness, 0.0..=1.0).text("rough"))
                                .changed();

                            let mut emission = [
                                material.emission_color.x,
                                material.emission_color.y,
                                material.emission_color.z,
                            ];
                            if ui.color_edit_button_rgb(&mut emission).changed() {
                                material.emission_color = Vector3::from(emission);
                                needs_reset = true;
                            }

                            needs_reset |= ui
                                .add(
                                    DragValue::new(&mut material.emission_power)
                                        .speed(0.05)
                                        .clamp_range(0.0..=f32::INFINITY)
                                        .prefix("power "),
                                )
                                .changed();
                        });
                    }

                    if needs_reset {
                        ember.reset_counter();
                    }
                });

            eframe::egui::CentralPanel::default().show(ctx, |ui| {
                ui.image(trace_texture, ui.available_size());
            });
        });

        if save_requested {
            self.save_screenshot(ember);
        }

        self.egui_state.handle_platform_output(
            &self.window,
            &self.egui_context,
            egui_output.platform_output,
        );
        let primitives = self.egui_context.tessellate(egui_output.shapes);
        egui_output.textures_delta.set.iter().for_each(|(id, delta)| {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, delta);
        });

        self.egui_renderer
            .update_buffers(&self.device, &self.queue, encoder, &primitives, &self.egui_screen);

        (primitives, egui_output.textures_delta.free)
    }

    fn save_screenshot(&mut self, ember: &Ember) {
        let size = ember.size();
        let path = format!("ember-{:04}.png", self.saved_frames);
        match image::save_buffer(
            &path,
            bytemuck::cast_slice(ember.final_image_data()),
            size.width,
            size.height,
            image::ColorType::Rgba8,
        ) {
            Ok(()) => {
                self.saved_frames += 1;
                log::info!("saved {path}");
            }
            Err(error) => log::error!("could not save {path}: {error}"),
        }
    }
}
