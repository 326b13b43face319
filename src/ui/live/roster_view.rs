use egui::{Align, Color32, Layout, RichText, Ui};
use egui_extras::{Column, TableBuilder};

use salesrace::roster::standings;

use crate::ui::car_color;

use super::LeaderboardApp;

const ROW_HEIGHT: f32 = 20.;

impl LeaderboardApp {
    pub(crate) fn roster_view(&self, ui: &mut Ui) {
        ui.heading(RichText::new("Standings").color(Color32::WHITE));

        let Some(frame) = &self.state.latest_frame else {
            ui.label(RichText::new("Waiting for the first frame").color(Color32::GRAY));
            return;
        };
        if frame.snapshot.is_empty() {
            ui.label(RichText::new("No sales people yet").color(Color32::GRAY));
            return;
        }

        let rows = standings(&frame.snapshot, frame.quota);
        TableBuilder::new(ui)
            .striped(true)
            .cell_layout(Layout::left_to_right(Align::Center))
            .column(Column::auto())
            .column(Column::auto())
            .column(Column::remainder())
            .column(Column::auto())
            .column(Column::auto())
            .column(Column::auto())
            .header(ROW_HEIGHT, |mut header| {
                for title in ["", "Id", "Name", "Team", "Sales", "Progress"] {
                    header.col(|ui| {
                        ui.strong(title);
                    });
                }
            })
            .body(|mut body| {
                for (index, row) in rows.iter().enumerate() {
                    body.row(ROW_HEIGHT, |mut table_row| {
                        table_row.col(|ui| {
                            ui.label(RichText::new("●").color(car_color(index)));
                        });
                        table_row.col(|ui| {
                            ui.label(row.id.to_string());
                        });
                        table_row.col(|ui| {
                            ui.label(&row.name);
                        });
                        table_row.col(|ui| {
                            ui.label(&row.team);
                        });
                        table_row.col(|ui| {
                            ui.label(format!("{:.2}", row.sales));
                        });
                        table_row.col(|ui| {
                            ui.label(row.percent_label());
                        });
                    });
                }
            });
    }
}
