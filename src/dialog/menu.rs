// Menu sizing and rendering for gauge popup dialogs.
// Consumes Settings: halcyon.dialog.*.
use crate::dialog::common::{self, BorderSettings};
use crate::panels::gauges::gauge::{GaugeMenu, GaugeMenuItem};
use crate::settings;
use iced::alignment;
use iced::widget::text::LineHeight;
use iced::widget::{Column, Row, Space, Text, button, mouse_area, scrollable, text};
use iced::{Element, Length, Pixels, Theme};

const CHECKED_GLYPH: &str = "󰄲";
const UNCHECKED_GLYPH: &str = "󰄱";

const DEFAULT_HEADER_FONT_SIZE: u32 = 14;
const ITEM_FONT_SIZE: u32 = 12;
const INDICATOR_SIZE: u32 = 16;
const BUTTON_PADDING_Y: u32 = 4;
const BUTTON_PADDING_X: u32 = 6;
const LIST_SPACING: u32 = 6;
const HEADER_LIST_SPACING: u32 = 6;
const MIN_WIDTH: u32 = 260;
const MAX_WIDTH: u32 = 640;
const CHAR_WIDTH: u32 = 7;
const LABEL_PADDING: u32 = 80;
const INDICATOR_SPACING: u32 = 10;
const MAX_VISIBLE_ROWS: u32 = 12;
const DEFAULT_HEADER_BOTTOM_SPACING: u32 = 4;
const DEFAULT_CONTAINER_PADDING: u32 = 10;

struct MenuDialogSettings {
    header_font_size: u32,
    header_bottom_spacing: u32,
    padding_y: u32,
    padding_x: u32,
}

impl MenuDialogSettings {
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

/// Window size for a menu. Long menus scroll past `MAX_VISIBLE_ROWS`.
pub fn dialog_dimensions(menu: &GaugeMenu) -> (u32, u32) {
    estimate_dimensions(menu, &MenuDialogSettings::load())
}

fn estimate_dimensions(menu: &GaugeMenu, cfg: &MenuDialogSettings) -> (u32, u32) {
    let longest = menu
        .items
        .iter()
        .map(|item| item.label.chars().count() as u32)
        .chain(std::iter::once(menu.title.chars().count() as u32))
        .max()
        .unwrap_or(0);
    let width = (longest * CHAR_WIDTH + LABEL_PADDING).clamp(MIN_WIDTH, MAX_WIDTH);

    let rows = (menu.items.len() as u32).clamp(1, MAX_VISIBLE_ROWS);
    let header_line = LineHeight::default()
        .to_absolute(Pixels(cfg.header_font_size as f32))
        .0;
    let item_line = LineHeight::default()
        .to_absolute(Pixels(ITEM_FONT_SIZE as f32))
        .0;
    let header_height = header_line.ceil() as u32 + cfg.header_bottom_spacing;
    let row_height = INDICATOR_SIZE.max(item_line.ceil() as u32) + BUTTON_PADDING_Y * 2;
    let list_height = rows * row_height + LIST_SPACING.saturating_mul(rows.saturating_sub(1));
    let height = header_height + HEADER_LIST_SPACING + list_height + cfg.padding_y * 2;

    (width, height)
}

pub fn menu_view<'a, Message: Clone + 'a>(
    menu: &'a GaugeMenu,
    hovered_item: Option<&'a str>,
    on_select: impl Fn(String) -> Message + 'a,
    on_hover_enter: impl Fn(String) -> Message + 'a,
    on_hover_exit: impl Fn(String) -> Message + 'a,
) -> Element<'a, Message> {
    let cfg = MenuDialogSettings::load();

    let header = Column::new()
        .width(Length::Fill)
        .push(common::dialog_title(menu.title.as_str(), cfg.header_font_size))
        .push(Space::new().height(Length::Fixed(cfg.header_bottom_spacing as f32)));

    let mut list = Column::new().width(Length::Fill).spacing(LIST_SPACING);
    if menu.items.is_empty() {
        list = list.push(Text::new("Nothing to show").size(ITEM_FONT_SIZE));
    }
    for GaugeMenuItem {
        id,
        label,
        selected,
    } in &menu.items
    {
        let is_hovered = hovered_item.is_some_and(|hovered| hovered == id.as_str());
        let is_selected = *selected;
        let indicator = Text::new(if is_selected {
            CHECKED_GLYPH
        } else {
            UNCHECKED_GLYPH
        })
        .size(INDICATOR_SIZE)
        .style(move |theme: &Theme| {
            let palette = theme.extended_palette();
            let color = if is_selected {
                palette.secondary.strong.color
            } else if is_hovered {
                palette.primary.weak.text
            } else {
                palette.primary.weak.color
            };
            text::Style { color: Some(color) }
        });
        let row = Row::new()
            .width(Length::Fill)
            .align_y(alignment::Vertical::Center)
            .spacing(INDICATOR_SPACING)
            .push(indicator)
            .push(Text::new(label.as_str()).size(ITEM_FONT_SIZE));

        let row_button = button(row)
            .padding([BUTTON_PADDING_Y as u16, BUTTON_PADDING_X as u16])
            .width(Length::Fill)
            .style(common::hover_button_style)
            .on_press(on_select(id.clone()));
        list = list.push(
            mouse_area(row_button)
                .on_enter(on_hover_enter(id.clone()))
                .on_exit(on_hover_exit(id.clone())),
        );
    }

    let content = common::dialog_surface(
        Column::new()
            .width(Length::Fill)
            .height(Length::Fill)
            .spacing(HEADER_LIST_SPACING)
            .push(header)
            .push(scrollable(list).height(Length::Fill)),
        cfg.padding_y as u16,
        cfg.padding_x as u16,
    );

    common::stack_with_border(content, BorderSettings::load(), common::popup_border_sides())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MenuDialogSettings {
        MenuDialogSettings {
            header_font_size: 14,
            header_bottom_spacing: 4,
            padding_y: 10,
            padding_x: 10,
        }
    }

    fn menu_with(count: usize) -> GaugeMenu {
        GaugeMenu {
            title: "Output".into(),
            items: (0..count)
                .map(|idx| GaugeMenuItem {
                    id: format!("sink-{idx}"),
                    label: format!("Sink {idx}"),
                    selected: idx == 0,
                })
                .collect(),
            on_select: None,
        }
    }

    #[test]
    fn height_stops_growing_after_visible_row_cap() {
        let (_, capped) = estimate_dimensions(&menu_with(MAX_VISIBLE_ROWS as usize), &cfg());
        let (_, overflow) = estimate_dimensions(&menu_with(40), &cfg());
        let (_, small) = estimate_dimensions(&menu_with(2), &cfg());
        assert_eq!(capped, overflow);
        assert!(small < capped);
    }

    #[test]
    fn width_respects_bounds() {
        let (width, _) = estimate_dimensions(&menu_with(1), &cfg());
        assert_eq!(width, MIN_WIDTH);
        let mut wide = menu_with(1);
        wide.items[0].label = "w".repeat(500);
        assert_eq!(estimate_dimensions(&wide, &cfg()).0, MAX_WIDTH);
    }
}
