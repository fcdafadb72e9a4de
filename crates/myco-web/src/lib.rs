#![cfg(target_arch = "wasm32")]

//! Browser host. `mountBackdrop` styles a canvas as a fixed, inert layer,
//! picks the best tier the page supports and keeps it animated until
//! `unmount` is called.

mod dom;

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Result, ensure};
use myco_core::{
    Algorithm, Backdrop, BackdropState, Capabilities, DeviceClass, EngineFactory, FrameOutcome,
    FrameTiming, Generation, GridSpec, InvariantGuard, ResizeOutcome, Settings, ThemeColor, Tier,
    Viewport,
};
use myco_gfx::{GpuContext, GpuEngineFactory};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, to_value};
use tracing::{debug, error, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::{Clamped, JsCast};
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement, ImageData, Window};

type FrameCallback = Closure<dyn FnMut(f64)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MountOptions {
    algorithm: Option<Algorithm>,
    opacity: Option<f32>,
    seed: Option<f64>,
    /// CSS custom property holding the theme colour.
    color_var: String,
    prefer_gpu: bool,
    /// Full settings; device defaults apply when absent.
    settings: Option<Settings>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            algorithm: None,
            opacity: None,
            seed: None,
            color_var: dom::DEFAULT_COLOR_VAR.to_string(),
            prefer_gpu: true,
            settings: None,
        }
    }
}

impl MountOptions {
    fn settings_for(&self, class: DeviceClass) -> Result<Settings> {
        let mut settings = self
            .settings
            .clone()
            .unwrap_or_else(|| Settings::for_device(class));
        if let Some(algorithm) = self.algorithm {
            settings.algorithm = algorithm;
        }
        if let Some(opacity) = self.opacity {
            settings.set_opacity(opacity);
        }
        if let Some(seed) = normalize_seed(self.seed)? {
            settings.rng_seed = Some(seed);
        }
        settings.validate()?;
        Ok(settings)
    }
}

struct Host {
    window: Window,
    canvas: HtmlCanvasElement,
    backdrop: Backdrop,
    ctx2d: Option<CanvasRenderingContext2d>,
    ticket: Generation,
    raf_id: Option<i32>,
    last_work_ms: Option<f32>,
}

impl Host {
    /// Runs one frame. Returns whether the loop should keep going.
    fn render_frame(&mut self) -> Result<bool, JsValue> {
        if !self.backdrop.is_current(self.ticket) {
            if *self.backdrop.state() != BackdropState::Running {
                return Ok(false);
            }
            debug!(
                stale = self.ticket.get(),
                current = self.backdrop.ticket().get(),
                "frame scheduled before reallocation; skipping"
            );
            self.ticket = self.backdrop.ticket();
            return Ok(true);
        }

        let started = dom::now_ms(&self.window);
        let outcome = self
            .backdrop
            .frame(FrameTiming {
                last_frame_ms: self.last_work_ms,
            })
            .map_err(js_error)?;
        if matches!(outcome, FrameOutcome::Presented(_)) {
            self.blit()?;
        }
        self.last_work_ms = started
            .zip(dom::now_ms(&self.window))
            .map(|(start, end)| (end - start) as f32);
        Ok(*self.backdrop.state() == BackdropState::Running)
    }

    /// Copies the composited layer onto the 2D context. The GPU tier presents
    /// straight to the canvas and has nothing to copy.
    fn blit(&self) -> Result<(), JsValue> {
        let (Some(ctx), Some(pixels)) = (&self.ctx2d, self.backdrop.pixels()) else {
            return Ok(());
        };
        let image = ImageData::new_with_u8_clamped_array_and_sh(
            Clamped(pixels.as_bytes()),
            pixels.width(),
            pixels.height(),
        )?;
        ctx.put_image_data(&image, 0.0, 0.0)
    }

    fn resize(&mut self, viewport: Viewport) -> Result<ResizeOutcome, JsValue> {
        let target = grid_for(&self.backdrop, viewport);
        if self.backdrop.grid() != Some(target) {
            dom::size_canvas(&self.canvas, Some(target));
        }
        self.backdrop.resize(viewport).map_err(js_error)
    }

    fn unmount(&mut self) {
        if let Some(id) = self.raf_id.take() {
            let _ = self.window.cancel_animation_frame(id);
        }
        self.backdrop.unmount();
        if let Some(ctx) = &self.ctx2d {
            ctx.clear_rect(
                0.0,
                0.0,
                f64::from(self.canvas.width()),
                f64::from(self.canvas.height()),
            );
        }
    }
}

/// Handle returned to the page. Dropping it (or calling `free`) unmounts.
#[wasm_bindgen]
pub struct BackdropHandle {
    host: Rc<RefCell<Host>>,
    frame: Rc<RefCell<Option<FrameCallback>>>,
    on_resize: Option<Closure<dyn FnMut()>>,
}

#[wasm_bindgen]
impl BackdropHandle {
    /// `gpu-compute`, `canvas-2d` or `dom-only`.
    #[wasm_bindgen(js_name = tier)]
    pub fn tier_js(&self) -> String {
        self.host.borrow().backdrop.tier().to_string()
    }

    #[wasm_bindgen(js_name = grid)]
    pub fn grid_js(&self) -> Result<JsValue, JsValue> {
        match self.host.borrow().backdrop.grid() {
            Some(grid) => to_value(&grid).map_err(js_error),
            None => Ok(JsValue::NULL),
        }
    }

    #[wasm_bindgen(js_name = isRunning)]
    pub fn is_running(&self) -> bool {
        *self.host.borrow().backdrop.state() == BackdropState::Running
    }

    /// Runs one frame outside the animation loop.
    #[wasm_bindgen(js_name = renderFrame)]
    pub fn render_frame(&self) -> Result<bool, JsValue> {
        self.host.borrow_mut().render_frame()
    }

    /// Applies a viewport in CSS pixels. Returns true when the grid was
    /// reallocated.
    #[wasm_bindgen(js_name = resize)]
    pub fn resize_js(&self, width: f64, height: f64, dpr: f64) -> Result<bool, JsValue> {
        let outcome = self
            .host
            .borrow_mut()
            .resize(Viewport::new(width, height, dpr))?;
        Ok(matches!(outcome, ResizeOutcome::Reallocated { .. }))
    }

    #[wasm_bindgen(js_name = setOpacity)]
    pub fn set_opacity(&self, opacity: f32) {
        self.host.borrow_mut().backdrop.set_opacity(opacity);
    }

    /// Stops the loop, detaches listeners and releases every buffer.
    #[wasm_bindgen(js_name = unmount)]
    pub fn unmount_js(&mut self) {
        self.release();
    }
}

impl BackdropHandle {
    fn release(&mut self) {
        let mut host = self.host.borrow_mut();
        if let Some(listener) = self.on_resize.take() {
            let _ = host
                .window
                .remove_event_listener_with_callback("resize", listener.as_ref().unchecked_ref());
        }
        host.unmount();
        self.frame.borrow_mut().take();
    }
}

impl Drop for BackdropHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Mounts the backdrop on `canvas`. `options` may be omitted.
#[wasm_bindgen(js_name = mountBackdrop)]
pub async fn mount_backdrop(
    canvas: HtmlCanvasElement,
    options: JsValue,
) -> Result<BackdropHandle, JsValue> {
    dom::init_tracing();
    let options: MountOptions = if options.is_undefined() || options.is_null() {
        MountOptions::default()
    } else {
        from_value(options).map_err(js_error)?
    };
    let window = dom::window()?;
    dom::apply_layer_style(&canvas)?;

    let class = dom::device_class(&window);
    let settings = options.settings_for(class).map_err(js_error)?;
    let color = match dom::theme_color(&window, &options.color_var) {
        Ok(color) => color,
        Err(violation) => {
            InvariantGuard::new(settings.invariants)
                .admit(violation)
                .map_err(js_error)?;
            ThemeColor::WHITE
        }
    };

    let gpu = if options.prefer_gpu && dom::has_webgpu(&window) {
        probe_gpu(&canvas).await
    } else {
        None
    };
    let caps = Capabilities {
        gpu_compute: gpu.is_some(),
        canvas_2d: dom::supports_canvas_2d(&window),
    };
    let mut backdrop = Backdrop::from_capabilities(
        settings,
        color,
        caps,
        gpu.map(|factory| Box::new(factory) as Box<dyn EngineFactory>),
    )
    .map_err(js_error)?;

    let viewport = dom::viewport(&window);
    dom::size_canvas(&canvas, Some(grid_for(&backdrop, viewport)));
    let ticket = backdrop.mount(viewport).map_err(js_error)?;
    let ctx2d = if backdrop.tier() == Tier::Canvas2d {
        let ctx = dom::context_2d(&canvas);
        if ctx.is_none() {
            warn!("canvas already holds a GPU context; 2D frames will not be drawn");
        }
        ctx
    } else {
        None
    };
    info!(tier = %backdrop.tier(), device = ?class, "backdrop ready");

    let animate = backdrop.tier() != Tier::DomOnly;
    let host = Rc::new(RefCell::new(Host {
        window: window.clone(),
        canvas,
        backdrop,
        ctx2d,
        ticket,
        raf_id: None,
        last_work_ms: None,
    }));
    let frame = Rc::new(RefCell::new(None));
    let mut handle = BackdropHandle {
        host,
        frame,
        on_resize: None,
    };
    if animate {
        start_loop(&handle.host, &handle.frame)?;
        handle.on_resize = Some(listen_for_resize(&window, &handle.host)?);
    }
    Ok(handle)
}

/// Adapter first, surface second: creating the surface claims the canvas
/// context, so a failed probe must leave the canvas untouched for 2D.
async fn probe_gpu(canvas: &HtmlCanvasElement) -> Option<GpuEngineFactory> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::BROWSER_WEBGPU,
        ..Default::default()
    });
    let ctx = match GpuContext::probe(&instance, None).await {
        Ok(ctx) => ctx,
        Err(err) => {
            warn!(error = %err, "WebGPU unavailable");
            return None;
        }
    };
    match instance.create_surface(wgpu::SurfaceTarget::Canvas(canvas.clone())) {
        Ok(surface) => {
            info!(adapter = %ctx.adapter_name(), "using GPU compute tier");
            Some(GpuEngineFactory::with_surface(Rc::new(ctx), Rc::new(surface)))
        }
        Err(err) => {
            warn!(error = %err, "failed to create canvas surface");
            None
        }
    }
}

fn start_loop(
    host: &Rc<RefCell<Host>>,
    slot: &Rc<RefCell<Option<FrameCallback>>>,
) -> Result<(), JsValue> {
    let weak_host = Rc::downgrade(host);
    let weak_slot = Rc::downgrade(slot);
    let callback = Closure::<dyn FnMut(f64)>::new(move |_timestamp: f64| {
        let (Some(host), Some(slot)) = (weak_host.upgrade(), weak_slot.upgrade()) else {
            return;
        };
        host.borrow_mut().raf_id = None;
        let keep_going = match host.borrow_mut().render_frame() {
            Ok(keep_going) => keep_going,
            Err(err) => {
                error!(error = ?err, "frame failed; stopping the animation loop");
                false
            }
        };
        if keep_going && let Err(err) = request_frame(&host, &slot) {
            error!(error = ?err, "requestAnimationFrame failed");
        }
    });
    *slot.borrow_mut() = Some(callback);
    request_frame(host, slot)
}

fn request_frame(
    host: &Rc<RefCell<Host>>,
    slot: &Rc<RefCell<Option<FrameCallback>>>,
) -> Result<(), JsValue> {
    let slot = slot.borrow();
    let Some(callback) = slot.as_ref() else {
        return Ok(());
    };
    let mut host = host.borrow_mut();
    let id = host
        .window
        .request_animation_frame(callback.as_ref().unchecked_ref())?;
    host.raf_id = Some(id);
    Ok(())
}

fn listen_for_resize(
    window: &Window,
    host: &Rc<RefCell<Host>>,
) -> Result<Closure<dyn FnMut()>, JsValue> {
    let weak_host = Rc::downgrade(host);
    let listener = Closure::<dyn FnMut()>::new(move || {
        let Some(host) = weak_host.upgrade() else {
            return;
        };
        let mut host = host.borrow_mut();
        let viewport = dom::viewport(&host.window);
        match host.resize(viewport) {
            Ok(ResizeOutcome::Reallocated { to, .. }) => {
                debug!(width = to.width(), height = to.height(), "layer reallocated");
            }
            Ok(ResizeOutcome::Unchanged) => {}
            Err(err) => error!(error = ?err, "resize failed; layer stopped"),
        }
    });
    window.add_event_listener_with_callback("resize", listener.as_ref().unchecked_ref())?;
    Ok(listener)
}

fn grid_for(backdrop: &Backdrop, viewport: Viewport) -> GridSpec {
    let settings = backdrop.settings();
    GridSpec::from_viewport(viewport, settings.device_pixel_ratio_cap, settings.grid_align)
}

fn normalize_seed(seed: Option<f64>) -> Result<Option<u64>> {
    let Some(value) = seed else {
        return Ok(None);
    };
    ensure!(value.is_finite(), "seed must be a finite number");
    ensure!(value >= 0.0, "seed must be non-negative");
    let truncated = value.floor();
    ensure!(
        truncated <= u64::MAX as f64,
        "seed must be representable as u64"
    );
    Ok(Some(truncated as u64))
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsError::new(&err.to_string()).into()
}

#[wasm_bindgen]
pub fn version() -> String {
    format!("myco-web {}", env!("CARGO_PKG_VERSION"))
}

#[wasm_bindgen(js_name = defaultMountOptions)]
pub fn default_mount_options() -> Result<JsValue, JsValue> {
    to_value(&MountOptions::default()).map_err(js_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;
    use web_sys::HtmlElement;

    wasm_bindgen_test_configure!(run_in_browser);

    fn fresh_canvas() -> HtmlCanvasElement {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .expect("document");
        let canvas: HtmlCanvasElement = document
            .create_element("canvas")
            .expect("create canvas")
            .dyn_into()
            .expect("canvas element");
        document
            .body()
            .expect("body")
            .append_child(&canvas)
            .expect("append canvas");
        canvas
    }

    fn set_theme(token: &str) {
        let root: HtmlElement = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.document_element())
            .expect("root")
            .dyn_into()
            .expect("html element");
        root.style()
            .set_property("--fg-primary", token)
            .expect("set theme var");
    }

    fn canvas_options(seed: f64) -> JsValue {
        to_value(&MountOptions {
            algorithm: Some(Algorithm::Dla),
            seed: Some(seed),
            prefer_gpu: false,
            // Pinned so grid sizes do not depend on the test browser's width.
            settings: Some(Settings::for_device(DeviceClass::Desktop)),
            ..MountOptions::default()
        })
        .expect("options")
    }

    #[wasm_bindgen_test]
    fn seeds_are_normalized() {
        assert_eq!(normalize_seed(None).expect("none"), None);
        assert_eq!(normalize_seed(Some(7.9)).expect("floor"), Some(7));
        assert!(normalize_seed(Some(-1.0)).is_err());
        assert!(normalize_seed(Some(f64::NAN)).is_err());
    }

    #[wasm_bindgen_test]
    fn options_override_device_defaults() {
        let options = MountOptions {
            algorithm: Some(Algorithm::Slime),
            opacity: Some(4.0),
            seed: Some(12.0),
            ..MountOptions::default()
        };
        let settings = options.settings_for(DeviceClass::Mobile).expect("settings");
        assert_eq!(settings.algorithm, Algorithm::Slime);
        assert_eq!(settings.opacity, 1.0);
        assert_eq!(settings.rng_seed, Some(12));
        assert_eq!(
            settings.walkers,
            Settings::for_device(DeviceClass::Mobile).walkers
        );
    }

    #[wasm_bindgen_test]
    fn layer_style_is_inert() {
        let canvas = fresh_canvas();
        dom::apply_layer_style(&canvas).expect("style");
        let style = canvas.style();
        assert_eq!(style.get_property_value("position").expect("position"), "fixed");
        assert_eq!(
            style
                .get_property_value("pointer-events")
                .expect("pointer-events"),
            "none"
        );
        assert_eq!(canvas.get_attribute("aria-hidden").as_deref(), Some("true"));
        canvas.remove();
    }

    #[wasm_bindgen_test]
    fn theme_colour_comes_from_the_root_variable() {
        set_theme("#454545");
        let window = web_sys::window().expect("window");
        let color = dom::theme_color(&window, dom::DEFAULT_COLOR_VAR).expect("colour");
        assert_eq!(color, ThemeColor::parse("#454545").expect("parse"));
        assert!(dom::theme_color(&window, "--myco-unset-var").is_err());
    }

    #[wasm_bindgen_test]
    async fn canvas_tier_draws_the_seed_and_unmounts() {
        set_theme("#454545");
        let canvas = fresh_canvas();
        let mut handle = mount_backdrop(canvas.clone(), canvas_options(5.0))
            .await
            .expect("mount");
        assert_eq!(handle.tier_js(), "canvas-2d");
        assert!(handle.is_running());

        let grid = handle.host.borrow().backdrop.grid().expect("grid");
        assert_eq!(canvas.width(), grid.width());
        assert_eq!(canvas.height(), grid.height());

        assert!(handle.render_frame().expect("frame"));
        let ctx = dom::context_2d(&canvas).expect("2d context");
        let (cx, cy) = grid.center();
        let centre = ctx
            .get_image_data(f64::from(cx), f64::from(cy), 1.0, 1.0)
            .expect("image data")
            .data();
        assert_eq!(centre.0, vec![0x45, 0x45, 0x45, 255]);

        handle.unmount_js();
        assert!(!handle.is_running());
        assert!(!handle.render_frame().expect("frame after unmount"));
        assert!(handle.frame.borrow().is_none());
        canvas.remove();
    }

    #[wasm_bindgen_test]
    async fn resize_reallocates_and_resizes_the_canvas() {
        set_theme("#ffffff");
        let canvas = fresh_canvas();
        let handle = mount_backdrop(canvas.clone(), canvas_options(9.0))
            .await
            .expect("mount");
        assert!(handle.resize_js(1600.0, 1200.0, 1.0).expect("resize"));
        assert_eq!((canvas.width(), canvas.height()), (800, 608));
        assert!(!handle.resize_js(1600.0, 1200.0, 1.0).expect("same size"));
        // First frame after a reallocation only refreshes its ticket.
        assert!(handle.render_frame().expect("frame"));
        assert!(handle.render_frame().expect("frame"));
        drop(handle);
        canvas.remove();
    }
}
