//! Browser plumbing: layer styling, theme colour, viewport and capability
//! reads. Each read happens once per mount.

use std::io;

use myco_core::{DeviceClass, GridSpec, InvariantViolation, LayerStyle, ThemeColor, Viewport};
use tracing_subscriber::fmt::MakeWriter;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{CanvasRenderingContext2d, Document, HtmlCanvasElement, Window};

pub const DEFAULT_COLOR_VAR: &str = "--fg-primary";

pub fn window() -> Result<Window, JsValue> {
    web_sys::window().ok_or_else(|| JsValue::from_str("no window"))
}

pub fn document(window: &Window) -> Result<Document, JsValue> {
    window
        .document()
        .ok_or_else(|| JsValue::from_str("no document"))
}

/// Fixed, full-viewport, non-interactive and hidden from assistive technology.
pub fn apply_layer_style(canvas: &HtmlCanvasElement) -> Result<(), JsValue> {
    let style = canvas.style();
    for (property, value) in LayerStyle::DECLARATIONS {
        style.set_property(property, value)?;
    }
    let (name, value) = LayerStyle::ARIA_HIDDEN;
    canvas.set_attribute(name, value)?;
    canvas.set_attribute("role", "presentation")
}

pub fn viewport(window: &Window) -> Viewport {
    let read = |value: Result<JsValue, JsValue>| value.ok().and_then(|v| v.as_f64()).unwrap_or(0.0);
    Viewport::new(
        read(window.inner_width()),
        read(window.inner_height()),
        window.device_pixel_ratio(),
    )
}

pub fn device_class(window: &Window) -> DeviceClass {
    let width = viewport(window).width;
    let agent = window.navigator().user_agent().ok();
    DeviceClass::classify(width, agent.as_deref())
}

/// Resolves `var` on the root element to a colour.
pub fn theme_color(window: &Window, var: &str) -> Result<ThemeColor, InvariantViolation> {
    let token = window
        .document()
        .and_then(|doc| doc.document_element())
        .and_then(|root| window.get_computed_style(&root).ok().flatten())
        .and_then(|style| style.get_property_value(var).ok())
        .unwrap_or_default();
    ThemeColor::parse(&token)
}

pub fn has_webgpu(window: &Window) -> bool {
    js_sys::Reflect::has(&window.navigator(), &JsValue::from_str("gpu")).unwrap_or(false)
}

/// Probes 2D support on a scratch canvas so the layer canvas stays free for
/// whichever context the chosen tier needs.
pub fn supports_canvas_2d(window: &Window) -> bool {
    let Ok(doc) = document(window) else {
        return false;
    };
    doc.create_element("canvas")
        .ok()
        .and_then(|el| el.dyn_into::<HtmlCanvasElement>().ok())
        .and_then(|canvas| canvas.get_context("2d").ok().flatten())
        .is_some()
}

pub fn context_2d(canvas: &HtmlCanvasElement) -> Option<CanvasRenderingContext2d> {
    canvas
        .get_context("2d")
        .ok()
        .flatten()
        .and_then(|ctx| ctx.dyn_into::<CanvasRenderingContext2d>().ok())
}

/// Backing store matches the grid; CSS stretches it over the viewport.
pub fn size_canvas(canvas: &HtmlCanvasElement, grid: Option<GridSpec>) {
    if let Some(grid) = grid {
        canvas.set_width(grid.width());
        canvas.set_height(grid.height());
    }
}

pub fn now_ms(window: &Window) -> Option<f64> {
    window.performance().map(|p| p.now())
}

/// Buffers one formatted event and logs it to the console on drop.
pub struct ConsoleWriter(Vec<u8>);

impl io::Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.0);
        let line = line.trim_end();
        if !line.is_empty() {
            web_sys::console::log_1(&JsValue::from_str(line));
        }
    }
}

pub struct MakeConsoleWriter;

impl<'a> MakeWriter<'a> for MakeConsoleWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter(Vec::new())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(MakeConsoleWriter)
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .with_ansi(false)
        .try_init();
}
