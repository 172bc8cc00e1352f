//! eframe shell: one window per capture slot plus a stats panel.

use std::path::PathBuf;
use std::time::Duration;

use egui::{Color32, RichText, ScrollArea, Vec2};
use thiserror::Error;
use tracing::{info, warn};

use super::gpu::WgpuBackend;
use crate::capture::FrameSource;
use crate::pipeline::{CaptureContext, DuplicateSlot, SlotHealth, SlotView};
use crate::Config;

const LIVE: Color32 = Color32::from_rgb(90, 200, 120);
const PENDING: Color32 = Color32::from_rgb(130, 135, 148);
const FAILED: Color32 = Color32::from_rgb(220, 80, 70);

#[derive(Debug, Error)]
pub enum AppError {
    #[error("eframe was not started with the wgpu renderer")]
    NoWgpu,

    #[error(transparent)]
    DuplicateSlot(#[from] DuplicateSlot),
}

pub struct FrameDeckApp {
    context: CaptureContext<WgpuBackend>,
    snapshot_dir: PathBuf,
    show_stats: bool,
    status: Option<String>,
}

impl FrameDeckApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        config: &Config,
        sources: Vec<(String, Box<dyn FrameSource>)>,
    ) -> Result<Self, AppError> {
        let render_state = cc.wgpu_render_state.clone().ok_or(AppError::NoWgpu)?;
        cc.egui_ctx.set_visuals(egui::Visuals::dark());

        let mut context = CaptureContext::new(
            WgpuBackend::new(render_state),
            config.pipeline.reopen_after_failures,
        );
        for (name, source) in sources {
            context.add_slot(name, source)?;
        }

        Ok(Self {
            context,
            snapshot_dir: config.display.snapshot_dir.clone(),
            show_stats: true,
            status: None,
        })
    }

    fn slot_window(&self, ctx: &egui::Context, view: &SlotView) -> bool {
        let mut snapshot = false;
        let texture = view.presented.and_then(|p| {
            let id = self.context.presenter().backend().texture_id(p.handle)?;
            Some((id, p))
        });

        egui::Window::new(view.name.as_str())
            .default_size([480.0, 320.0])
            .resizable(true)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(health_text(&view.health));
                    if let Some((_, p)) = texture {
                        ui.label(
                            RichText::new(format!("{}x{}", p.width, p.height)).color(PENDING),
                        );
                    }
                    snapshot = ui
                        .add_enabled(texture.is_some(), egui::Button::new("Snapshot"))
                        .clicked();
                });
                ui.separator();

                match texture {
                    // Always draw at the size of the latest upload
                    Some((id, p)) => {
                        ScrollArea::both().show(ui, |ui| {
                            ui.image((id, Vec2::new(p.width as f32, p.height as f32)));
                        });
                    }
                    None => {
                        ui.label(match &view.health {
                            SlotHealth::Failed(reason) => reason.as_str(),
                            _ => "Waiting for the first frame...",
                        });
                    }
                }
            });

        snapshot
    }

    fn stats_window(&mut self, ctx: &egui::Context, views: &[SlotView]) {
        egui::Window::new("Stats")
            .open(&mut self.show_stats)
            .default_pos([16.0, 16.0])
            .show(ctx, |ui| {
                egui::Grid::new("slot-stats").striped(true).show(ui, |ui| {
                    ui.strong("Slot");
                    ui.strong("Presented");
                    ui.strong("Held");
                    ui.strong("Failures");
                    ui.strong("Reopens");
                    ui.strong("Capture");
                    ui.strong("Latency");
                    ui.strong("Last error");
                    ui.end_row();

                    for view in views {
                        let s = &view.stats;
                        ui.label(view.name.as_str());
                        ui.label(s.frames_presented.to_string());
                        ui.label(s.frames_held.to_string());
                        ui.label(s.capture_failures.to_string());
                        ui.label(s.reopens.to_string());
                        ui.label(millis(s.last_capture));
                        ui.label(millis(s.last_latency));
                        match &s.last_error {
                            Some(e) => ui.label(RichText::new(e.as_str()).color(FAILED)),
                            None => ui.label("-"),
                        };
                        ui.end_row();
                    }
                });

                if let Some(status) = &self.status {
                    ui.separator();
                    ui.label(status.as_str());
                }
            });
    }
}

fn millis(d: Option<Duration>) -> String {
    d.map(|d| format!("{:.1} ms", d.as_secs_f64() * 1000.0))
        .unwrap_or_else(|| "-".into())
}

fn health_text(health: &SlotHealth) -> RichText {
    match health {
        SlotHealth::Pending => RichText::new("opening").color(PENDING),
        SlotHealth::Live => RichText::new("live").color(LIVE),
        SlotHealth::Failed(_) => RichText::new("unavailable").color(FAILED),
    }
}

impl eframe::App for FrameDeckApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            info!("Escape pressed, closing");
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        let views = self.context.cycle();

        let mut requested = Vec::new();
        for view in &views {
            if self.slot_window(ctx, view) {
                requested.push(view.name.clone());
            }
        }
        for slot in requested {
            self.status = Some(match self.context.snapshot(&slot, &self.snapshot_dir) {
                Ok(path) => format!("Saved {}", path.display()),
                Err(e) => {
                    warn!("Snapshot of {slot} failed: {e}");
                    format!("Snapshot of {slot} failed: {e}")
                }
            });
        }

        self.stats_window(ctx, &views);

        // Capture runs once per repaint
        ctx.request_repaint();
    }

    fn on_exit(&mut self) {
        self.context.shutdown();
    }
}
