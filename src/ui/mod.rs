use egui::Color32;

use salesrace::ConnectivityState;

pub(crate) mod live;

pub(crate) const PALETTE_BLACK: Color32 = Color32::from_rgb(12, 12, 12);
pub(crate) const PALETTE_BROWN: Color32 = Color32::from_rgb(72, 30, 20);
pub(crate) const PALETTE_MAROON: Color32 = Color32::from_rgb(155, 57, 34);
pub(crate) const PALETTE_TRACK: Color32 = Color32::from_rgb(51, 51, 51);

/// Car colours, assigned by roster position and reused past the sixth car.
pub(crate) const CAR_COLORS: [Color32; 6] = [
    Color32::from_rgb(0xff, 0x44, 0x44),
    Color32::from_rgb(0x44, 0xff, 0x44),
    Color32::from_rgb(0x44, 0x44, 0xff),
    Color32::from_rgb(0xff, 0xff, 0x44),
    Color32::from_rgb(0xff, 0x44, 0xff),
    Color32::from_rgb(0x44, 0xff, 0xff),
];

pub(crate) fn car_color(index: usize) -> Color32 {
    CAR_COLORS[index % CAR_COLORS.len()]
}

pub(crate) fn status_indicator(state: ConnectivityState) -> (&'static str, Color32) {
    match state {
        ConnectivityState::Connected => ("Connected", Color32::GREEN),
        ConnectivityState::Connecting => ("Connecting...", Color32::YELLOW),
        ConnectivityState::Reconnecting => ("Reconnecting...", Color32::ORANGE),
        ConnectivityState::Disconnected => ("Disconnected", Color32::RED),
    }
}
