use std::f64::consts::TAU;

use egui::{Color32, CornerRadius, Frame, Id, Layout, RichText, Sense, ViewportCommand};
use egui_plot::{Line, PlotPoint, PlotPoints, Points, Text};

use salesrace::{
    RaceCommand,
    roster::projector::{TRACK_INNER_RADIUS, TRACK_OUTER_RADIUS, TRACK_RADIUS, milestones},
};

use crate::ui::{PALETTE_TRACK, car_color, status_indicator};

use super::{DEFAULT_BUTTON_CORNER_RADIUS, DEFAULT_WINDOW_CORNER_RADIUS, LeaderboardApp};

const RING_SEGMENTS: usize = 128;
const PLOT_HALF_EXTENT: f64 = 150.;
const CAR_RADIUS: f32 = 7.;
const MILESTONE_LABEL_RADIUS: f64 = TRACK_OUTER_RADIUS + 14.;

fn ring(radius: f64) -> Vec<[f64; 2]> {
    (0..=RING_SEGMENTS)
        .map(|i| {
            let angle = i as f64 / RING_SEGMENTS as f64 * TAU;
            [angle.cos() * radius, angle.sin() * radius]
        })
        .collect()
}

impl LeaderboardApp {
    pub(crate) fn track_view(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("controls")
            .min_height(30.)
            .frame(Frame::new().corner_radius(CornerRadius {
                nw: DEFAULT_WINDOW_CORNER_RADIUS,
                ne: DEFAULT_WINDOW_CORNER_RADIUS,
                ..Default::default()
            }))
            .show(ctx, |ui| {
                let drag_sense = ui.interact(ui.max_rect(), Id::new("window-drag"), Sense::drag());
                if drag_sense.dragged() {
                    ui.ctx().send_viewport_cmd(ViewportCommand::StartDrag);
                }
                if drag_sense.drag_stopped() {
                    if let Some(outer_rect) = ui.input(|is| is.viewport().outer_rect) {
                        self.app_config.window_position = outer_rect.min.into();
                    }
                }
                ui.with_layout(Layout::left_to_right(egui::Align::Center), |ui| {
                    ui.add_space(10.);
                    let (status, color) = status_indicator(self.state.connectivity);
                    ui.label(RichText::new("●").color(color));
                    ui.label(RichText::new(status).color(Color32::WHITE));
                    ui.add_space(10.);

                    if ui
                        .add(
                            egui::Button::new("Test sale")
                                .corner_radius(DEFAULT_BUTTON_CORNER_RADIUS),
                        )
                        .clicked()
                    {
                        self.send_command(RaceCommand::TestSale);
                    }
                    if ui
                        .add(
                            egui::Button::new("Standings")
                                .selected(self.app_config.show_roster)
                                .corner_radius(DEFAULT_BUTTON_CORNER_RADIUS),
                        )
                        .clicked()
                    {
                        self.app_config.show_roster = !self.app_config.show_roster;
                    }

                    if let Some(reason) = &self.state.bootstrap_error {
                        ui.label(
                            RichText::new(format!("Roster unavailable: {reason}"))
                                .color(Color32::RED),
                        );
                    }

                    ui.with_layout(Layout::right_to_left(egui::Align::Center), |ui| {
                        ui.add_space(10.);
                        if ui
                            .add(
                                egui::Button::new("✕")
                                    .corner_radius(DEFAULT_BUTTON_CORNER_RADIUS),
                            )
                            .clicked()
                        {
                            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                        }
                    });
                });
            });

        if self.app_config.show_roster {
            egui::SidePanel::right("standings")
                .resizable(true)
                .default_width(360.)
                .show(ctx, |ui| self.roster_view(ui));
        }

        egui::CentralPanel::default()
            .frame(Frame::new().corner_radius(CornerRadius {
                sw: DEFAULT_WINDOW_CORNER_RADIUS,
                se: DEFAULT_WINDOW_CORNER_RADIUS,
                ..Default::default()
            }))
            .show(ctx, |ui| {
                let plot = egui_plot::Plot::new("race-track")
                    .data_aspect(1.)
                    .allow_drag(false)
                    .allow_scroll(false)
                    .allow_zoom(false)
                    .allow_boxed_zoom(false)
                    .include_x(-PLOT_HALF_EXTENT)
                    .include_x(PLOT_HALF_EXTENT)
                    .include_y(-PLOT_HALF_EXTENT)
                    .include_y(PLOT_HALF_EXTENT)
                    .show_axes(false)
                    .show_grid(false);

                plot.show_background(false).show(ui, |plot_ui| {
                    plot_ui.line(
                        Line::new("Track", PlotPoints::new(ring(TRACK_RADIUS)))
                            .color(PALETTE_TRACK)
                            .width(30.),
                    );
                    plot_ui.line(
                        Line::new("Inner edge", PlotPoints::new(ring(TRACK_INNER_RADIUS)))
                            .color(Color32::WHITE)
                            .width(2.),
                    );
                    plot_ui.line(
                        Line::new("Outer edge", PlotPoints::new(ring(TRACK_OUTER_RADIUS)))
                            .color(Color32::WHITE)
                            .width(2.),
                    );

                    let Some(frame) = &self.state.latest_frame else {
                        return;
                    };

                    for milestone in milestones(frame.quota) {
                        let scale = MILESTONE_LABEL_RADIUS / TRACK_RADIUS;
                        plot_ui.text(Text::new(
                            milestone.label.clone(),
                            PlotPoint::new(
                                milestone.coordinate.x * scale,
                                milestone.coordinate.y * scale,
                            ),
                            RichText::new(&milestone.label).color(Color32::LIGHT_GRAY),
                        ));
                    }

                    for (index, (position, competitor)) in frame
                        .positions
                        .iter()
                        .zip(frame.snapshot.iter())
                        .enumerate()
                    {
                        let name = competitor
                            .display_name
                            .clone()
                            .unwrap_or_else(|| format!("#{}", competitor.id));
                        plot_ui.points(
                            Points::new(
                                name,
                                PlotPoints::new(vec![[
                                    position.coordinate.x,
                                    position.coordinate.y,
                                ]]),
                            )
                            .radius(CAR_RADIUS)
                            .filled(true)
                            .color(car_color(index)),
                        );
                    }
                });
            });
    }
}
