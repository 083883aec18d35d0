// Info dialog sizing and rendering for gauge popup dialogs.
// Consumes Settings: halcyon.dialog.*.
use crate::dialog::common::{self, BorderSettings};
use crate::settings;
use iced::widget::{Column, Space, Text};
use iced::{Element, Length};

const DEFAULT_HEADER_FONT_SIZE: u32 = 14;
const BODY_FONT_SIZE: u32 = 12;
const MAX_CHARS_PER_LINE: u32 = 60;
const MIN_WIDTH: u32 = 160;
const MAX_WIDTH: u32 = 640;
const HEADER_SPACING: u32 = 4;
const LINE_SPACING: u32 = 6;
const DEFAULT_HEADER_BOTTOM_SPACING: u32 = 4;
const DEFAULT_CONTAINER_PADDING: u32 = 10;
const BOTTOM_PADDING_EXTRA: u32 = 4;

struct InfoDialogSettings {
    header_font_size: u32,
    header_bottom_spacing: u32,
    padding_y: u32,
    padding_x: u32,
}

impl InfoDialogSettings {
    fn load() -> Self {
        let settings = settings::settings();
        Self {
            header_font_size: settings
                .get_parsed_or("halcyon.dialog.header.font_size", DEFAULT_HEADER_FONT_SIZE),
            header_bottom_spacing: settings.get_parsed_or(
                "halcyon.dialog.header.bottom_spacing",
                DEFAULT_HEADER_BOTTOM_SPACING,
            ),
            padding_y: settings
                .get_parsed_or("halcyon.dialog.container.padding_y", DEFAULT_CONTAINER_PADDING),
            padding_x: settings
                .get_parsed_or("halcyon.dialog.container.padding_x", DEFAULT_CONTAINER_PADDING),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoDialog {
    pub title: String,
    pub lines: Vec<String>,
}

impl InfoDialog {
    pub fn new(title: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            title: title.into(),
            lines,
        }
    }
}

/// Window size for an info dialog, estimated from line count and the longest line.
pub fn dialog_dimensions(dialog: &InfoDialog) -> (u32, u32) {
    let cfg = InfoDialogSettings::load();
    estimate_dimensions(dialog, &cfg)
}

fn estimate_dimensions(dialog: &InfoDialog, cfg: &InfoDialogSettings) -> (u32, u32) {
    let char_width =
        ((cfg.header_font_size.max(BODY_FONT_SIZE) as f32) * 0.6).ceil() as u32;
    let longest = dialog
        .lines
        .iter()
        .map(|line| line.chars().count() as u32)
        .chain(std::iter::once(dialog.title.chars().count() as u32))
        .max()
        .unwrap_or(0);
    let target_chars = longest.clamp(1, MAX_CHARS_PER_LINE);
    let width = ((target_chars + 2) * char_width + cfg.padding_x * 2).clamp(MIN_WIDTH, MAX_WIDTH);

    let header_rows = (dialog.title.chars().count() as u32)
        .max(1)
        .div_ceil(target_chars);
    let body_rows: u32 = dialog
        .lines
        .iter()
        .map(|line| (line.chars().count() as u32).max(1).div_ceil(target_chars))
        .sum::<u32>()
        .max(1);
    let header_height =
        header_rows * (cfg.header_font_size as f32 * 1.2).ceil() as u32 + HEADER_SPACING;
    let line_height = (BODY_FONT_SIZE as f32 * 1.2).ceil() as u32;
    let body_height = body_rows * line_height
        + LINE_SPACING.saturating_mul(dialog.lines.len().saturating_sub(1) as u32);
    let height = header_height
        + cfg.header_bottom_spacing
        + body_height
        + cfg.padding_y * 2
        + BOTTOM_PADDING_EXTRA
        + (BODY_FONT_SIZE as f32 * 0.6).ceil() as u32;

    (width, height)
}

pub fn info_view<'a, Message: 'a>(dialog: &'a InfoDialog) -> Element<'a, Message> {
    let cfg = InfoDialogSettings::load();

    let lines = dialog.lines.iter().fold(
        Column::new().width(Length::Fill).spacing(LINE_SPACING),
        |col, line| col.push(Text::new(line.as_str()).size(BODY_FONT_SIZE).width(Length::Fill)),
    );

    let content = common::dialog_surface(
        Column::new()
            .width(Length::Fill)
            .height(Length::Fill)
            .spacing(HEADER_SPACING)
            .push(common::dialog_title(dialog.title.as_str(), cfg.header_font_size))
            .push(Space::new().height(Length::Fixed(cfg.header_bottom_spacing as f32)))
            .push(lines),
        cfg.padding_y as u16,
        cfg.padding_x as u16,
    );

    common::stack_with_border(content, BorderSettings::load(), common::popup_border_sides())
}
