//! Single-page PDF report for one stored detection.

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use image::RgbImage;
use printpdf::{
    BuiltinFont, ColorBits, ColorSpace, Image, ImageTransform, ImageXObject, Mm, PdfDocument, Px,
};

use crate::record::DetectionRecord;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const LINE_HEIGHT_MM: f32 = 8.0;
const IMAGE_MAX_WIDTH_MM: f32 = 150.0;

pub struct PdfReport;

impl PdfReport {
    /// File name the transport offers for the report of `id`.
    pub fn file_name(id: i64) -> String {
        format!("pothole_report_{}.pdf", id)
    }

    /// Report lines in print order, title first.
    pub fn lines(record: &DetectionRecord) -> Vec<String> {
        vec![
            format!("Pothole Report #{}", record.id),
            format!("Latitude: {}", coordinate(record.latitude)),
            format!("Longitude: {}", coordinate(record.longitude)),
            format!("Severity: {}", record.severity),
            format!("Area: {:.2} m2", record.area),
            format!("Depth: {:.2} m", record.depth_meters),
            format!("Confidence: {:.1}%", f64::from(record.confidence) * 100.0),
            format!("Timestamp: {}", timestamp(record.timestamp_ms)),
        ]
    }

    /// Render the report; the overlay is embedded below the text when given.
    pub fn render(record: &DetectionRecord, overlay: Option<&RgbImage>) -> Result<Vec<u8>> {
        let lines = Self::lines(record);
        let (doc, page, layer) = PdfDocument::new(
            lines[0].as_str(),
            Mm(PAGE_WIDTH_MM),
            Mm(PAGE_HEIGHT_MM),
            "report",
        );
        let title_font = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| anyhow!("pdf font: {:?}", e))?;
        let body_font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| anyhow!("pdf font: {:?}", e))?;
        let layer = doc.get_page(page).get_layer(layer);

        let mut y = PAGE_HEIGHT_MM - MARGIN_MM;
        layer.use_text(lines[0].as_str(), 16.0, Mm(MARGIN_MM), Mm(y), &title_font);
        y -= LINE_HEIGHT_MM * 1.5;
        for line in &lines[1..] {
            layer.use_text(line.as_str(), 12.0, Mm(MARGIN_MM), Mm(y), &body_font);
            y -= LINE_HEIGHT_MM;
        }

        if let Some(overlay) = overlay.filter(|o| o.width() > 0 && o.height() > 0) {
            let (width_px, height_px) = overlay.dimensions();
            let available_mm = y - MARGIN_MM;
            let aspect = height_px as f32 / width_px as f32;
            let width_mm = IMAGE_MAX_WIDTH_MM.min(available_mm / aspect);
            let height_mm = width_mm * aspect;
            let xobject = ImageXObject {
                width: Px(width_px as usize),
                height: Px(height_px as usize),
                color_space: ColorSpace::Rgb,
                bits_per_component: ColorBits::Bit8,
                interpolate: true,
                image_data: overlay.as_raw().clone(),
                image_filter: None,
                smask: None,
                clipping_bbox: None,
            };
            Image::from(xobject).add_to_layer(
                layer.clone(),
                ImageTransform {
                    translate_x: Some(Mm(MARGIN_MM)),
                    translate_y: Some(Mm(y - height_mm)),
                    dpi: Some(width_px as f32 * 25.4 / width_mm),
                    ..Default::default()
                },
            );
        }

        doc.save_to_bytes()
            .map_err(|e| anyhow!("pdf encode: {:?}", e))
    }
}

fn coordinate(value: Option<f64>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

fn timestamp(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}
