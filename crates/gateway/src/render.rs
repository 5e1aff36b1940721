//! Ticket and credential images

use ab_glyph::{FontRef, PxScale};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{DynamicImage, ImageFormat, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use antrian_shared::ticket_label;

/// Characters of complaint text shown in the ticket caption
pub const COMPLAINT_PREVIEW_CHARS: usize = 50;

/// Characters of the patient name printed on a ticket
pub const NAME_MAX_CHARS: usize = 30;

static REGULAR_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");
static BOLD_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans-Bold.ttf");

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("QR code generation failed: {0}")]
    Qr(String),

    #[error("Font could not be loaded: {0}")]
    Font(String),

    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Render task failed: {0}")]
    Task(String),
}

/// Everything printed on one ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketFace {
    pub clinic_name: String,
    pub sequence_number: i32,
    pub name: String,
    pub complaint: String,
    /// Issue time as printed, already in clinic local time
    pub issued_at: String,
}

/// Produces the ticket image delivered to the patient
pub trait ImageRenderer: Send + Sync {
    /// PNG bytes for one ticket
    fn render(&self, face: &TicketFace) -> Result<Vec<u8>, RenderError>;
}

/// First `max` characters of `text`, with an ellipsis when cut
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

fn encode_png(image: DynamicImage) -> Result<Vec<u8>, RenderError> {
    let mut png_data = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut png_data);
    image.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(png_data)
}

/// Render a login credential as a base64 PNG data URL
pub fn credential_qr_data_url(payload: &str) -> Result<String, RenderError> {
    let qr = qrcode::QrCode::new(payload.as_bytes()).map_err(|e| RenderError::Qr(e.to_string()))?;
    let qr_image = qr.render::<Luma<u8>>().build();
    let png_data = encode_png(DynamicImage::ImageLuma8(qr_image))?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(&png_data)))
}

const WIDTH: u32 = 600;
const HEIGHT: u32 = 800;
const HEADER_HEIGHT: u32 = 150;
const MARGIN: i32 = 50;
const CONTENT_WIDTH: u32 = WIDTH - 2 * MARGIN as u32;

const NAME_TOP: i32 = 425;
const COMPLAINT_TOP: i32 = 525;
const COMPLAINT_LINE_HEIGHT: i32 = 30;
const COMPLAINT_MAX_LINES: usize = 6;

const TITLE_SCALE: f32 = 36.0;
const SUBTITLE_SCALE: f32 = 20.0;
const LABEL_SCALE: f32 = 120.0;
const HEADING_SCALE: f32 = 24.0;
const NAME_SCALE: f32 = 22.0;
const COMPLAINT_SCALE: f32 = 20.0;
const FOOTER_SCALE: f32 = 16.0;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const HEADER: Rgb<u8> = Rgb([46, 204, 113]);
const INK: Rgb<u8> = Rgb([44, 62, 80]);
const HEADING: Rgb<u8> = Rgb([52, 73, 94]);
const MUTED: Rgb<u8> = Rgb([127, 140, 141]);
const FOOTER: Rgb<u8> = Rgb([149, 165, 166]);
const RULE: Rgb<u8> = Rgb([189, 195, 199]);

/// Cut `text` until it fits `max_width` pixels, marking the cut with "..."
fn fit_to_width(font: &FontRef<'_>, scale: PxScale, text: &str, max_width: u32) -> String {
    if text_size(scale, font, text).0 <= max_width {
        return text.to_string();
    }
    let mut chars: Vec<char> = text.chars().collect();
    while chars.pop().is_some() {
        let kept: String = chars.iter().collect();
        let candidate = format!("{}...", kept.trim_end());
        if text_size(scale, font, &candidate).0 <= max_width {
            return candidate;
        }
    }
    String::new()
}

/// Greedy word wrap. Text beyond `max_lines` is dropped and the last line
/// ends with "...".
fn wrap_lines(
    font: &FontRef<'_>,
    scale: PxScale,
    text: &str,
    max_width: u32,
    max_lines: usize,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", line, word)
        };
        if line.is_empty() || text_size(scale, font, &candidate).0 <= max_width {
            line = candidate;
        } else {
            lines.push(std::mem::replace(&mut line, word.to_string()));
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }

    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            last.push_str(" ...");
        }
    }
    lines
        .iter()
        .map(|line| fit_to_width(font, scale, line, max_width))
        .collect()
}

fn draw_centered(
    canvas: &mut RgbImage,
    font: &FontRef<'_>,
    scale: PxScale,
    color: Rgb<u8>,
    top: i32,
    text: &str,
) {
    let (width, _) = text_size(scale, font, text);
    let left = (WIDTH.saturating_sub(width) / 2) as i32;
    draw_text_mut(canvas, color, left, top, scale, font, text);
}

fn load_font(bytes: &'static [u8]) -> Result<FontRef<'static>, RenderError> {
    FontRef::try_from_slice(bytes).map_err(|e| RenderError::Font(e.to_string()))
}

/// Default renderer: clinic header, large ticket label, patient name, wrapped
/// complaint and the issue time
#[derive(Debug, Clone, Default)]
pub struct PngTicketRenderer;

impl PngTicketRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ImageRenderer for PngTicketRenderer {
    fn render(&self, face: &TicketFace) -> Result<Vec<u8>, RenderError> {
        let regular = load_font(REGULAR_FONT)?;
        let bold = load_font(BOLD_FONT)?;
        let mut canvas = RgbImage::from_pixel(WIDTH, HEIGHT, WHITE);

        draw_filled_rect_mut(&mut canvas, Rect::at(0, 0).of_size(WIDTH, HEADER_HEIGHT), HEADER);
        let clinic = fit_to_width(&bold, PxScale::from(TITLE_SCALE), &face.clinic_name, CONTENT_WIDTH);
        draw_centered(&mut canvas, &bold, PxScale::from(TITLE_SCALE), WHITE, 35, &clinic);
        draw_centered(&mut canvas, &regular, PxScale::from(SUBTITLE_SCALE), WHITE, 90, "Tiket Antrian");

        let label = ticket_label(face.sequence_number);
        draw_centered(&mut canvas, &bold, PxScale::from(LABEL_SCALE), INK, 185, &label);

        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(MARGIN, 349).of_size(CONTENT_WIDTH, 2),
            RULE,
        );

        let heading = PxScale::from(HEADING_SCALE);
        draw_text_mut(&mut canvas, HEADING, MARGIN, 385, heading, &bold, "Nama Pasien:");
        let name_scale = PxScale::from(NAME_SCALE);
        let name = fit_to_width(
            &regular,
            name_scale,
            &truncate_chars(&face.name, NAME_MAX_CHARS),
            CONTENT_WIDTH,
        );
        draw_text_mut(&mut canvas, INK, MARGIN, NAME_TOP, name_scale, &regular, &name);

        draw_text_mut(&mut canvas, HEADING, MARGIN, 485, heading, &bold, "Keluhan:");
        let complaint_scale = PxScale::from(COMPLAINT_SCALE);
        let lines = wrap_lines(
            &regular,
            complaint_scale,
            &face.complaint,
            CONTENT_WIDTH,
            COMPLAINT_MAX_LINES,
        );
        for (i, line) in lines.iter().enumerate() {
            let top = COMPLAINT_TOP + i as i32 * COMPLAINT_LINE_HEIGHT;
            draw_text_mut(&mut canvas, MUTED, MARGIN, top, complaint_scale, &regular, line);
        }

        let footer = PxScale::from(FOOTER_SCALE);
        draw_centered(
            &mut canvas,
            &regular,
            footer,
            FOOTER,
            735,
            "Silakan menunggu panggilan dari petugas",
        );
        draw_centered(
            &mut canvas,
            &regular,
            footer,
            FOOTER,
            765,
            &format!("Waktu: {}", face.issued_at),
        );

        encode_png(DynamicImage::ImageRgb8(canvas))
    }
}
