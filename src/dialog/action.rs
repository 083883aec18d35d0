// Action dialog sizing and rendering for gauge popup dialogs.
// Consumes Settings: halcyon.dialog.*.
use crate::dialog::common::{self, BorderSettings};
use crate::panels::gauges::gauge::{GaugeActionDialog, GaugeActionItem};
use crate::settings;
use iced::alignment;
use iced::widget::{Column, Row, Text, button, container};
use iced::{Element, Length};

const GLYPH_SIZE: u32 = 22;
const LABEL_SIZE: u32 = 11;
const BUTTON_WIDTH: u32 = 64;
const BUTTON_PADDING_Y: u32 = 6;
const ITEM_SPACING_X: u32 = 6;
const TITLE_SPACING: u32 = 6;
const DEFAULT_HEADER_FONT_SIZE: u32 = 14;
const DEFAULT_CONTAINER_PADDING: u32 = 10;

struct ActionDialogSettings {
    header_font_size: u32,
    padding_y: u32,
    padding_x: u32,
}

impl ActionDialogSettings {
    fn load() -> Self {
        let settings = settings::settings();
        Self {
            header_font_size: settings
                .get_parsed_or("halcyon.dialog.header.font_size", DEFAULT_HEADER_FONT_SIZE),
            padding_y: settings
                .get_parsed_or("halcyon.dialog.container.padding_y", DEFAULT_CONTAINER_PADDING),
            padding_x: settings
                .get_parsed_or("halcyon.dialog.container.padding_x", DEFAULT_CONTAINER_PADDING),
        }
    }
}

/// Window size for an action dialog: one fixed-width button per item in a single row.
pub fn dialog_dimensions(dialog: &GaugeActionDialog) -> (u32, u32) {
    estimate_dimensions(dialog, &ActionDialogSettings::load())
}

fn estimate_dimensions(dialog: &GaugeActionDialog, cfg: &ActionDialogSettings) -> (u32, u32) {
    let buttons = dialog.items.len().max(1) as u32;
    let row_width = buttons * BUTTON_WIDTH + ITEM_SPACING_X * buttons.saturating_sub(1);
    let title_width = dialog.title.chars().count() as u32 * 8;
    let width = row_width.max(title_width) + cfg.padding_x * 2;

    let button_height = GLYPH_SIZE + LABEL_SIZE + 4 + BUTTON_PADDING_Y * 2;
    let title_height = (cfg.header_font_size as f32 * 1.3).ceil() as u32;
    let height = title_height + TITLE_SPACING + button_height + cfg.padding_y * 2;

    (width, height)
}

pub fn action_view<'a, Message: Clone + 'a>(
    dialog: &'a GaugeActionDialog,
    on_select: impl Fn(String) -> Message + 'a,
) -> Element<'a, Message> {
    let cfg = ActionDialogSettings::load();

    let mut buttons = Row::new()
        .align_y(alignment::Vertical::Center)
        .spacing(ITEM_SPACING_X);
    for GaugeActionItem { id, glyph, label } in &dialog.items {
        let face = Column::new()
            .align_x(alignment::Horizontal::Center)
            .spacing(4)
            .push(Text::new(glyph.as_str()).size(GLYPH_SIZE))
            .push(Text::new(label.as_str()).size(LABEL_SIZE));
        buttons = buttons.push(
            button(
                container(face)
                    .width(Length::Fill)
                    .align_x(alignment::Horizontal::Center),
            )
            .width(Length::Fixed(BUTTON_WIDTH as f32))
            .padding([BUTTON_PADDING_Y as u16, 2])
            .style(common::hover_button_style)
            .on_press(on_select(id.clone())),
        );
    }

    let content = common::dialog_surface(
        Column::new()
            .width(Length::Fill)
            .spacing(TITLE_SPACING)
            .push(common::dialog_title(dialog.title.as_str(), cfg.header_font_size))
            .push(
                container(buttons)
                    .width(Length::Fill)
                    .align_x(alignment::Horizontal::Center),
            ),
        cfg.padding_y as u16,
        cfg.padding_x as u16,
    );

    common::stack_with_border(content, BorderSettings::load(), common::popup_border_sides())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog(count: usize) -> GaugeActionDialog {
        GaugeActionDialog {
            title: "Session".into(),
            items: (0..count)
                .map(|idx| GaugeActionItem {
                    id: format!("a{idx}"),
                    glyph: "⏻".into(),
                    label: "Off".into(),
                })
                .collect(),
            on_select: None,
        }
    }

    #[test]
    fn width_grows_per_button() {
        let cfg = ActionDialogSettings {
            header_font_size: 14,
            padding_y: 10,
            padding_x: 10,
        };
        let (one, h1) = estimate_dimensions(&dialog(1), &cfg);
        let (four, h4) = estimate_dimensions(&dialog(4), &cfg);
        assert_eq!(four - one, 3 * (BUTTON_WIDTH + ITEM_SPACING_X));
        assert_eq!(h1, h4);
    }
}
