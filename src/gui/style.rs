use iced::{Background, Border, Color, Shadow, Theme};
use iced::widget::button::{StyleSheet, Appearance};

/// A row of a selectable list, highlighted when selected.
pub struct ListRowStyleSheet {
    pub selected: bool,
}

impl StyleSheet for ListRowStyleSheet {
    type Style = Theme;

    fn active(&self, _style: &Self::Style) -> Appearance {
        Appearance {
            shadow_offset: Default::default(),
            background: if self.selected {
                Some(Background::Color(Color::from_rgb8(0xd6, 0xe4, 0xff)))
            } else {
                None
            },
            text_color: Color::BLACK,
            border: Border {
                color: Color::TRANSPARENT,
                width: 0.0,
                radius: 2.0.into(),
            },
            shadow: Shadow::default(),
        }
    }
}
