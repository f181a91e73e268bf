//! PDF content stream builder.
//!
//! Builds the operator sequences of appearance streams according to
//! ISO 32000-1:2008 Sections 8-9.

use std::io::Write;

/// Operations that can be added to a content stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentStreamOp {
    /// Save graphics state (q)
    SaveState,
    /// Restore graphics state (Q)
    RestoreState,
    /// Set transformation matrix (cm)
    Transform(f32, f32, f32, f32, f32, f32),
    /// Begin text object (BT)
    BeginText,
    /// End text object (ET)
    EndText,
    /// Set font and size (Tf)
    SetFont(String, f32),
    /// Move text position (Td)
    MoveText(f32, f32),
    /// Set text leading (TL)
    SetTextLeading(f32),
    /// Move to next line (T*)
    NextLine,
    /// Show text (Tj), single-byte encoded
    ShowText(Vec<u8>),
    /// Set fill color RGB (rg)
    SetFillColorRGB(f32, f32, f32),
    /// Set stroke color RGB (RG)
    SetStrokeColorRGB(f32, f32, f32),
    /// Set line width (w)
    SetLineWidth(f32),
    /// Move to (m)
    MoveTo(f32, f32),
    /// Line to (l)
    LineTo(f32, f32),
    /// Stroke path (S)
    Stroke,
    /// Paint XObject (Do)
    PaintXObject(String),
}

/// Builder for PDF content streams.
#[derive(Debug, Default)]
pub struct ContentStreamBuilder {
    operations: Vec<ContentStreamOp>,
    current_font: Option<String>,
    current_font_size: f32,
    in_text_object: bool,
}

impl ContentStreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation to the stream.
    pub fn op(&mut self, op: ContentStreamOp) -> &mut Self {
        self.operations.push(op);
        self
    }

    pub fn begin_text(&mut self) -> &mut Self {
        if !self.in_text_object {
            self.op(ContentStreamOp::BeginText);
            self.in_text_object = true;
        }
        self
    }

    pub fn end_text(&mut self) -> &mut Self {
        if self.in_text_object {
            self.op(ContentStreamOp::EndText);
            self.in_text_object = false;
        }
        self
    }

    /// Set font for text operations (skipped when unchanged).
    pub fn set_font(&mut self, font_name: &str, size: f32) -> &mut Self {
        if self.current_font.as_deref() != Some(font_name) || self.current_font_size != size {
            self.op(ContentStreamOp::SetFont(font_name.to_string(), size));
            self.current_font = Some(font_name.to_string());
            self.current_font_size = size;
        }
        self
    }

    /// Show `text` encoded as Latin-1; other characters become `?`.
    pub fn show_text(&mut self, text: &str) -> &mut Self {
        let bytes = text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();
        self.op(ContentStreamOp::ShowText(bytes))
    }

    /// Draw `name` scaled to `width` x `height` at (`x`, `y`).
    pub fn draw_xobject(&mut self, name: &str, x: f32, y: f32, width: f32, height: f32) -> &mut Self {
        self.op(ContentStreamOp::SaveState)
            .op(ContentStreamOp::Transform(width, 0.0, 0.0, height, x, y))
            .op(ContentStreamOp::PaintXObject(name.to_string()))
            .op(ContentStreamOp::RestoreState)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Serialize the operations, one per line.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for op in &self.operations {
            // Writing into a Vec cannot fail
            let _ = write_op(&mut buf, op);
            buf.push(b'\n');
        }
        buf
    }
}

fn write_op<W: Write>(w: &mut W, op: &ContentStreamOp) -> std::io::Result<()> {
    match op {
        ContentStreamOp::SaveState => write!(w, "q"),
        ContentStreamOp::RestoreState => write!(w, "Q"),
        ContentStreamOp::Transform(a, b, c, d, e, f) => write!(w, "{} {} {} {} {} {} cm", a, b, c, d, e, f),
        ContentStreamOp::BeginText => write!(w, "BT"),
        ContentStreamOp::EndText => write!(w, "ET"),
        ContentStreamOp::SetFont(name, size) => write!(w, "/{} {} Tf", name, size),
        ContentStreamOp::MoveText(tx, ty) => write!(w, "{} {} Td", tx, ty),
        ContentStreamOp::SetTextLeading(leading) => write!(w, "{} TL", leading),
        ContentStreamOp::NextLine => write!(w, "T*"),
        ContentStreamOp::ShowText(text) => {
            write!(w, "(")?;
            write_escaped_string(w, text)?;
            write!(w, ") Tj")
        },
        ContentStreamOp::SetFillColorRGB(r, g, b) => write!(w, "{} {} {} rg", r, g, b),
        ContentStreamOp::SetStrokeColorRGB(r, g, b) => write!(w, "{} {} {} RG", r, g, b),
        ContentStreamOp::SetLineWidth(width) => write!(w, "{} w", width),
        ContentStreamOp::MoveTo(x, y) => write!(w, "{} {} m", x, y),
        ContentStreamOp::LineTo(x, y) => write!(w, "{} {} l", x, y),
        ContentStreamOp::Stroke => write!(w, "S"),
        ContentStreamOp::PaintXObject(name) => write!(w, "/{} Do", name),
    }
}

fn write_escaped_string<W: Write>(w: &mut W, text: &[u8]) -> std::io::Result<()> {
    for &byte in text {
        match byte {
            b'(' => write!(w, "\\(")?,
            b')' => write!(w, "\\)")?,
            b'\\' => write!(w, "\\\\")?,
            b'\n' => write!(w, "\\n")?,
            b'\r' => write!(w, "\\r")?,
            b'\t' => write!(w, "\\t")?,
            _ => w.write_all(&[byte])?,
        }
    }
    Ok(())
}
