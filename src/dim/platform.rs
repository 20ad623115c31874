//! Win32 backend: layered popup windows for overlays, `EnumWindows` and a
//! GDI screen blit for the window source, and a low-level mouse hook for
//! pointer presses.

use crate::dim::compositor::{Compositor, ZPlacement};
use crate::dim::geometry::Rect;
use crate::dim::source::{Bitmap, DisplayInfo, TrackedWindow, WindowId, WindowSource};
use crate::dim::surface::SurfaceId;
use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::mem;
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, Once};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{BOOL, COLORREF, HMODULE, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, EnumDisplayMonitors,
    GetDC, GetDIBits, GetMonitorInfoW, GetStockObject, ReleaseDC, SelectObject, BITMAPINFO,
    BITMAPINFOHEADER, BI_RGB, BLACK_BRUSH, DIB_RGB_COLORS, HBRUSH, HDC, HGDIOBJ, HMONITOR,
    MONITORINFOEXW, SRCCOPY,
};
use windows::Win32::Graphics::Dwm::{DwmGetWindowAttribute, DWMWA_CLOAKED};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, EnumWindows,
    GetForegroundWindow, GetMessageW, GetWindow, GetWindowLongPtrW, GetWindowRect,
    GetWindowTextLengthW, GetWindowThreadProcessId, IsIconic, IsWindow, IsWindowVisible,
    PeekMessageW, PostThreadMessageW, RegisterClassW, SetLayeredWindowAttributes,
    SetWindowDisplayAffinity, SetWindowPos, SetWindowsHookExW, ShowWindow, TranslateMessage,
    UnhookWindowsHookEx, GWL_EXSTYLE, GW_HWNDPREV, GW_OWNER, HC_ACTION, HHOOK, HWND_NOTOPMOST,
    HWND_TOP, HWND_TOPMOST, LWA_ALPHA, MSG, PM_NOREMOVE, PM_REMOVE, SWP_NOACTIVATE, SWP_NOMOVE,
    SWP_NOSIZE, SWP_NOZORDER, SWP_SHOWWINDOW, SW_HIDE, WDA_EXCLUDEFROMCAPTURE, WH_MOUSE_LL,
    WINDOW_EX_STYLE, WINDOW_STYLE, WM_LBUTTONDOWN, WM_MBUTTONDOWN, WM_QUIT, WM_RBUTTONDOWN,
    WNDCLASSW, WS_EX_LAYERED, WS_EX_NOACTIVATE, WS_EX_TOOLWINDOW, WS_EX_TOPMOST,
    WS_EX_TRANSPARENT, WS_POPUP,
};

const OVERLAY_CLASS: &str = "SuperDimmerOverlay";
const HOOK_READY_TIMEOUT: Duration = Duration::from_secs(2);

fn widestring(value: &str) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    std::ffi::OsStr::new(value)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn hwnd_of(id: WindowId) -> HWND {
    HWND(id.0 as usize as *mut c_void)
}

fn window_id(hwnd: HWND) -> WindowId {
    WindowId(hwnd.0 as usize as u64)
}

fn rect_of(rc: &RECT) -> Rect {
    Rect::new(
        f64::from(rc.left),
        f64::from(rc.top),
        f64::from(rc.right - rc.left),
        f64::from(rc.bottom - rc.top),
    )
}

fn alpha_of(level: f64) -> u8 {
    (level.clamp(0.0, 1.0) * 255.0).round() as u8
}

unsafe extern "system" fn overlay_wndproc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

#[derive(Debug, Clone, Copy)]
struct Fade {
    from: f64,
    to: f64,
    started: Instant,
    duration: Duration,
}

impl Fade {
    fn level_at(&self, now: Instant) -> (f64, bool) {
        if self.duration.is_zero() {
            return (self.to, true);
        }
        let t = (now.saturating_duration_since(self.started).as_secs_f64()
            / self.duration.as_secs_f64())
        .min(1.0);
        (self.from + (self.to - self.from) * t, t >= 1.0)
    }
}

struct Win32Surface {
    hwnd: HWND,
    alpha: u8,
    fade: Option<Fade>,
}

/// One layered, click-through, capture-excluded black popup per surface.
/// Must stay on the thread that created it.
pub struct Win32Compositor {
    hinstance: HMODULE,
    class_name: Vec<u16>,
    surfaces: HashMap<SurfaceId, Win32Surface>,
}

impl Win32Compositor {
    pub fn new() -> Result<Self> {
        static REGISTER_CLASS: Once = Once::new();
        let class_name = widestring(OVERLAY_CLASS);
        let hinstance = unsafe { GetModuleHandleW(PCWSTR::null()) }?;

        REGISTER_CLASS.call_once(|| unsafe {
            let wc = WNDCLASSW {
                hInstance: hinstance.into(),
                lpszClassName: PCWSTR(class_name.as_ptr()),
                lpfnWndProc: Some(overlay_wndproc),
                hbrBackground: HBRUSH(GetStockObject(BLACK_BRUSH).0),
                ..Default::default()
            };
            if RegisterClassW(&wc) == 0 {
                tracing::error!("RegisterClassW failed for overlay class");
            }
        });

        Ok(Self {
            hinstance,
            class_name,
            surfaces: HashMap::new(),
        })
    }

    fn set_alpha(surface: &mut Win32Surface, level: f64) {
        let alpha = alpha_of(level);
        if alpha == surface.alpha {
            return;
        }
        surface.alpha = alpha;
        unsafe {
            let _ = SetLayeredWindowAttributes(surface.hwnd, COLORREF(0), alpha, LWA_ALPHA);
        }
    }

    fn place(hwnd: HWND, z: ZPlacement) {
        let flags = SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE | SWP_SHOWWINDOW;
        unsafe {
            match z {
                ZPlacement::Elevated => {
                    let _ = SetWindowPos(hwnd, HWND_TOPMOST, 0, 0, 0, 0, flags);
                }
                ZPlacement::AboveWindow(owner) => {
                    let _ = SetWindowPos(hwnd, HWND_NOTOPMOST, 0, 0, 0, 0, flags);
                    let above = GetWindow(hwnd_of(owner), GW_HWNDPREV).unwrap_or_default();
                    if above == hwnd {
                        return;
                    }
                    let insert_after = if above.0.is_null() { HWND_TOP } else { above };
                    let _ = SetWindowPos(hwnd, insert_after, 0, 0, 0, 0, flags);
                }
            }
        }
    }

    fn step_fades(&mut self, now: Instant) {
        for surface in self.surfaces.values_mut() {
            let Some(fade) = surface.fade else {
                continue;
            };
            let (level, done) = fade.level_at(now);
            Self::set_alpha(surface, level);
            if done {
                surface.fade = None;
            }
        }
    }
}

impl Compositor for Win32Compositor {
    fn create_surface(&mut self, id: SurfaceId, frame: Rect, z: ZPlacement) -> Result<()> {
        let mut ex_style: WINDOW_EX_STYLE =
            WS_EX_LAYERED | WS_EX_TRANSPARENT | WS_EX_TOOLWINDOW | WS_EX_NOACTIVATE;
        if z == ZPlacement::Elevated {
            ex_style |= WS_EX_TOPMOST;
        }
        let hwnd = unsafe {
            CreateWindowExW(
                ex_style,
                PCWSTR(self.class_name.as_ptr()),
                PCWSTR::null(),
                WINDOW_STYLE(WS_POPUP.0),
                frame.x.round() as i32,
                frame.y.round() as i32,
                frame.width.round().max(1.0) as i32,
                frame.height.round().max(1.0) as i32,
                None,
                None,
                self.hinstance,
                None,
            )
        }
        .map_err(|err| anyhow!("CreateWindowExW failed for {id}: {err}"))?;

        unsafe {
            if let Err(err) = SetLayeredWindowAttributes(hwnd, COLORREF(0), 0, LWA_ALPHA) {
                let _ = DestroyWindow(hwnd);
                return Err(anyhow!("layered attributes failed for {id}: {err}"));
            }
            if SetWindowDisplayAffinity(hwnd, WDA_EXCLUDEFROMCAPTURE).is_err() {
                tracing::debug!(surface = %id, "capture exclusion unavailable");
            }
        }
        Self::place(hwnd, z);
        self.surfaces.insert(
            id,
            Win32Surface {
                hwnd,
                alpha: 0,
                fade: None,
            },
        );
        Ok(())
    }

    fn set_frame(&mut self, id: SurfaceId, frame: Rect) {
        let Some(surface) = self.surfaces.get(&id) else {
            return;
        };
        unsafe {
            let _ = SetWindowPos(
                surface.hwnd,
                HWND::default(),
                frame.x.round() as i32,
                frame.y.round() as i32,
                frame.width.round().max(1.0) as i32,
                frame.height.round().max(1.0) as i32,
                SWP_NOZORDER | SWP_NOACTIVATE,
            );
        }
    }

    fn animate_level(&mut self, id: SurfaceId, from: f64, to: f64, duration: Duration) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        let fade = Fade {
            from,
            to,
            started: Instant::now(),
            duration,
        };
        let (level, done) = fade.level_at(fade.started);
        Self::set_alpha(surface, level);
        surface.fade = (!done).then_some(fade);
    }

    fn order(&mut self, id: SurfaceId, z: ZPlacement) {
        if let Some(surface) = self.surfaces.get(&id) {
            Self::place(surface.hwnd, z);
        }
    }

    fn order_out(&mut self, id: SurfaceId) {
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.fade = None;
            unsafe {
                let _ = ShowWindow(surface.hwnd, SW_HIDE);
            }
        }
    }

    fn destroy_surface(&mut self, id: SurfaceId) {
        if let Some(surface) = self.surfaces.remove(&id) {
            unsafe {
                if let Err(err) = DestroyWindow(surface.hwnd) {
                    tracing::warn!(surface = %id, error = %err, "DestroyWindow failed");
                }
            }
        }
    }

    fn pump(&mut self) {
        unsafe {
            let mut msg = MSG::default();
            while PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE).into() {
                let _ = TranslateMessage(&msg);
                let _ = DispatchMessageW(&msg);
            }
        }
        self.step_fades(Instant::now());
    }
}

impl Drop for Win32Compositor {
    fn drop(&mut self) {
        for (_, surface) in self.surfaces.drain() {
            unsafe {
                let _ = DestroyWindow(surface.hwnd);
            }
        }
    }
}

/// Visible top-level windows of other processes, the foreground window,
/// monitors, and pixels via a blit of the window's screen area.
#[derive(Debug, Default)]
pub struct Win32WindowSource;

impl Win32WindowSource {
    pub fn new() -> Self {
        Self
    }
}

struct EnumCtx {
    own_pid: u32,
    foreground: HWND,
    windows: Vec<TrackedWindow>,
}

/// Cloaked windows sit on another virtual desktop or are suspended by the
/// shell. They are alive but not on screen.
fn is_cloaked(hwnd: HWND) -> bool {
    let mut cloaked = 0u32;
    let queried = unsafe {
        DwmGetWindowAttribute(
            hwnd,
            DWMWA_CLOAKED,
            &mut cloaked as *mut u32 as *mut c_void,
            mem::size_of::<u32>() as u32,
        )
    };
    queried.is_ok() && cloaked != 0
}

unsafe extern "system" fn enum_windows_cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let ctx = unsafe { &mut *(lparam.0 as *mut EnumCtx) };
    unsafe {
        if !IsWindowVisible(hwnd).as_bool() || IsIconic(hwnd).as_bool() || is_cloaked(hwnd) {
            return BOOL(1);
        }
        if !GetWindow(hwnd, GW_OWNER).unwrap_or_default().0.is_null() {
            return BOOL(1);
        }
        let ex_style = GetWindowLongPtrW(hwnd, GWL_EXSTYLE) as u32;
        if ex_style & WS_EX_TOOLWINDOW.0 != 0 || GetWindowTextLengthW(hwnd) <= 0 {
            return BOOL(1);
        }
        let mut pid = 0u32;
        let _ = GetWindowThreadProcessId(hwnd, Some(&mut pid));
        if pid == 0 || pid == ctx.own_pid {
            return BOOL(1);
        }
        let mut rc = RECT::default();
        if GetWindowRect(hwnd, &mut rc).is_err() {
            return BOOL(1);
        }
        let bounds = rect_of(&rc);
        if bounds.is_empty() {
            return BOOL(1);
        }
        ctx.windows.push(TrackedWindow {
            id: window_id(hwnd),
            owner_pid: pid,
            bounds,
            is_frontmost: hwnd == ctx.foreground,
        });
    }
    BOOL(1)
}

unsafe extern "system" fn enum_monitors_cb(
    monitor: HMONITOR,
    _hdc: HDC,
    _rect: *mut RECT,
    data: LPARAM,
) -> BOOL {
    let displays = unsafe { &mut *(data.0 as *mut Vec<DisplayInfo>) };
    let mut info = MONITORINFOEXW::default();
    info.monitorInfo.cbSize = mem::size_of::<MONITORINFOEXW>() as u32;
    if unsafe { GetMonitorInfoW(monitor, &mut info.monitorInfo as *mut _ as *mut _) }.as_bool() {
        displays.push(DisplayInfo {
            id: displays.len() as u32,
            bounds: rect_of(&info.monitorInfo.rcMonitor),
        });
    }
    BOOL(1)
}

fn capture_screen_area(bounds: Rect) -> Option<Bitmap> {
    let (x, y) = (bounds.x.round() as i32, bounds.y.round() as i32);
    let (width, height) = (bounds.width.round() as i32, bounds.height.round() as i32);
    if width <= 0 || height <= 0 {
        return None;
    }

    unsafe {
        let screen_dc = GetDC(HWND::default());
        if screen_dc.0.is_null() {
            return None;
        }
        let mem_dc = CreateCompatibleDC(screen_dc);
        if mem_dc.0.is_null() {
            let _ = ReleaseDC(HWND::default(), screen_dc);
            return None;
        }
        let bmp = CreateCompatibleBitmap(screen_dc, width, height);
        if bmp.0.is_null() {
            let _ = DeleteDC(mem_dc);
            let _ = ReleaseDC(HWND::default(), screen_dc);
            return None;
        }

        let old_obj = SelectObject(mem_dc, HGDIOBJ(bmp.0));
        let blitted = BitBlt(mem_dc, 0, 0, width, height, screen_dc, x, y, SRCCOPY).is_ok();

        let mut bmi = BITMAPINFO::default();
        bmi.bmiHeader = BITMAPINFOHEADER {
            biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width,
            biHeight: -height,
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            ..Default::default()
        };
        let mut pixels = vec![0u8; (width as usize) * (height as usize) * 4];
        let rows = if blitted {
            GetDIBits(
                mem_dc,
                bmp,
                0,
                height as u32,
                Some(pixels.as_mut_ptr() as *mut _),
                &mut bmi,
                DIB_RGB_COLORS,
            )
        } else {
            0
        };

        let _ = SelectObject(mem_dc, old_obj);
        let _ = DeleteObject(bmp);
        let _ = DeleteDC(mem_dc);
        let _ = ReleaseDC(HWND::default(), screen_dc);

        if rows == 0 {
            return None;
        }
        for px in pixels.chunks_exact_mut(4) {
            px.swap(0, 2);
            px[3] = 255;
        }
        Bitmap::from_raw(width as u32, height as u32, pixels)
    }
}

impl WindowSource for Win32WindowSource {
    fn list_visible_windows(&self) -> Vec<TrackedWindow> {
        let mut ctx = EnumCtx {
            own_pid: std::process::id(),
            foreground: unsafe { GetForegroundWindow() },
            windows: Vec::new(),
        };
        unsafe {
            if let Err(err) = EnumWindows(
                Some(enum_windows_cb),
                LPARAM(&mut ctx as *mut EnumCtx as isize),
            ) {
                tracing::debug!(error = %err, "EnumWindows stopped early");
            }
        }
        ctx.windows
    }

    fn frontmost_window_id(&self) -> Option<WindowId> {
        let hwnd = unsafe { GetForegroundWindow() };
        (!hwnd.0.is_null()).then(|| window_id(hwnd))
    }

    fn list_displays(&self) -> Vec<DisplayInfo> {
        let mut displays: Vec<DisplayInfo> = Vec::new();
        unsafe {
            let _ = EnumDisplayMonitors(
                HDC::default(),
                None,
                Some(enum_monitors_cb),
                LPARAM(&mut displays as *mut Vec<DisplayInfo> as isize),
            );
        }
        displays
    }

    fn capture_window(&self, id: WindowId) -> Option<Bitmap> {
        let hwnd = hwnd_of(id);
        let mut rc = RECT::default();
        unsafe {
            if !IsWindowVisible(hwnd).as_bool() || GetWindowRect(hwnd, &mut rc).is_err() {
                return None;
            }
        }
        capture_screen_area(rect_of(&rc))
    }

    fn window_exists(&self, id: WindowId) -> bool {
        unsafe { IsWindow(hwnd_of(id)) }.as_bool()
    }
}

static POINTER_SENDER: OnceCell<Mutex<Option<Sender<Instant>>>> = OnceCell::new();

fn pointer_sender() -> &'static Mutex<Option<Sender<Instant>>> {
    POINTER_SENDER.get_or_init(|| Mutex::new(None))
}

unsafe extern "system" fn pointer_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code == HC_ACTION as i32 {
        let msg = w_param.0 as u32;
        if msg == WM_LBUTTONDOWN || msg == WM_RBUTTONDOWN || msg == WM_MBUTTONDOWN {
            // never block the input thread
            if let Ok(guard) = pointer_sender().try_lock() {
                if let Some(sender) = guard.as_ref() {
                    let _ = sender.send(Instant::now());
                }
            }
        }
    }
    unsafe { CallNextHookEx(HHOOK(std::ptr::null_mut()), n_code, w_param, l_param) }
}

/// `WH_MOUSE_LL` hook on its own message-loop thread. Forwards the time of
/// every button press and never swallows input. Uninstalled on drop.
pub struct PointerHook {
    thread_id: u32,
    join: Option<JoinHandle<()>>,
}

impl PointerHook {
    pub fn install(sender: Sender<Instant>) -> Result<Self> {
        if let Ok(mut guard) = pointer_sender().lock() {
            *guard = Some(sender);
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32>>(1);
        let join = std::thread::Builder::new()
            .name("dim-pointer-hook".into())
            .spawn(move || {
                let mut msg = MSG::default();
                unsafe {
                    let _ = PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_NOREMOVE);
                }
                let thread_id = unsafe { GetCurrentThreadId() };

                let hmodule = match unsafe { GetModuleHandleW(PCWSTR::null()) } {
                    Ok(h) => h,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow!(err)));
                        return;
                    }
                };
                let hook = match unsafe {
                    SetWindowsHookExW(WH_MOUSE_LL, Some(pointer_hook_proc), hmodule, 0)
                } {
                    Ok(h) if !h.0.is_null() => h,
                    Ok(_) => {
                        let _ = ready_tx.send(Err(anyhow!(windows::core::Error::from_win32())));
                        return;
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow!(err)));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(thread_id));

                loop {
                    let r = unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) };
                    if r.0 == 0 || r.0 == -1 {
                        break;
                    }
                    unsafe {
                        let _ = TranslateMessage(&msg);
                        DispatchMessageW(&msg);
                    }
                }
                unsafe {
                    let _ = UnhookWindowsHookEx(hook);
                }
                tracing::debug!("pointer hook removed");
            })?;

        let thread_id = match ready_rx.recv_timeout(HOOK_READY_TIMEOUT) {
            Ok(Ok(thread_id)) => thread_id,
            Ok(Err(err)) => {
                Self::clear_sender();
                let _ = join.join();
                return Err(err.context("SetWindowsHookExW(WH_MOUSE_LL) failed"));
            }
            Err(_) => {
                Self::clear_sender();
                return Err(anyhow!("pointer hook thread did not signal readiness"));
            }
        };
        tracing::debug!(thread_id, "pointer hook installed");
        Ok(Self {
            thread_id,
            join: Some(join),
        })
    }

    fn clear_sender() {
        if let Ok(mut guard) = pointer_sender().lock() {
            guard.take();
        }
    }
}

impl Drop for PointerHook {
    fn drop(&mut self) {
        Self::clear_sender();
        unsafe {
            let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
