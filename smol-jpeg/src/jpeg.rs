//! Minimal baseline JPEG decoder producing RGB565 MCU blocks.
//!
//! Two-phase, pull-in / push-out contract: [`JpegDecoder::prepare`] pulls
//! header bytes up to the start of scan and reports the image size,
//! [`JpegDecoder::decompress`] keeps pulling entropy-coded data and pushes
//! each decoded MCU as a rectangle of native-endian RGB565 pixels. Peak
//! RAM is one MCU (16x16 at most) plus ~10 KB of tables.
//!
//! Up to three components with sampling factors of 1 or 2 (greyscale,
//! 4:4:4, 4:2:2, 4:2:0). Progressive and arithmetic-coded files are
//! rejected. Output can be downscaled by 1/2, 1/4 or 1/8.

use alloc::boxed::Box;
use alloc::vec::Vec;

// JPEG marker bytes

const M_SOF0: u8 = 0xC0;
const M_SOF1: u8 = 0xC1;
const M_SOF2: u8 = 0xC2;
const M_DHT: u8 = 0xC4;
const M_SOI: u8 = 0xD8;
const M_EOI: u8 = 0xD9;
const M_SOS: u8 = 0xDA;
const M_DQT: u8 = 0xDB;
const M_DRI: u8 = 0xDD;
const M_RST0: u8 = 0xD0;
const M_RST7: u8 = 0xD7;
const M_TEM: u8 = 0x01;

// limits

const MAX_COMP: usize = 3;
const MAX_SAMP: u8 = 2;
const MAX_PIXELS: u32 = 2048 * 2048;

// pull granularity; the caller may return fewer bytes
const IN_BUF: usize = 512;

// one component plane of an MCU: up to 2x2 blocks of 8x8
const PLANE_STRIDE: usize = 16;
const PLANE_SIZE: usize = PLANE_STRIDE * PLANE_STRIDE;

// zig-zag scan order

#[rustfmt::skip]
const ZZ: [usize; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

// IDCT constants (IJG ISLOW, CONST_BITS = 13)

const CB: i32 = 13;
const P1: i32 = 2;
const F0298: i32 = 2446;
const F0390: i32 = 3196;
const F0541: i32 = 4433;
const F0765: i32 = 6270;
const F0899: i32 = 7373;
const F1175: i32 = 9633;
const F1501: i32 = 12299;
const F1847: i32 = 15137;
const F1961: i32 = 16069;
const F2053: i32 = 16819;
const F2562: i32 = 20995;
const F3072: i32 = 25172;

/// Inclusive pixel rectangle of one decoded block, in scaled output
/// coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

impl Rect {
    #[inline]
    pub fn width(&self) -> u16 {
        self.right - self.left + 1
    }

    #[inline]
    pub fn height(&self) -> u16 {
        self.bottom - self.top + 1
    }
}

// types

#[derive(Clone, Copy, Default)]
struct Component {
    id: u8,
    h_samp: u8,
    v_samp: u8,
    qt_idx: u8,
    dc_tbl: u8,
    ac_tbl: u8,
}

struct HuffTable {
    lut: [(u8, u8); 256],
    mincode: [i32; 17],
    maxcode: [i32; 17],
    valptr: [usize; 17],
    values: [u8; 256],
}

struct JpegState {
    width: u16,
    height: u16,
    num_comp: u8,
    comp: [Component; MAX_COMP],
    max_h: u8,
    max_v: u8,
    qt: [[u16; 64]; 4],
    qt_ok: [bool; 4],
    dc_huff: [HuffTable; 4],
    ac_huff: [HuffTable; 4],
    dc_ok: [bool; 4],
    ac_ok: [bool; 4],
    restart_interval: u16,
    scan_num_comp: u8,
    scan_order: [u8; MAX_COMP],
    scan_ss: u8,
    scan_se: u8,
}

impl JpegState {
    fn heap_new() -> Result<Box<Self>, &'static str> {
        let layout = core::alloc::Layout::new::<Self>();
        // all fields are plain integers, arrays and bools; zero is valid
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err("jpeg: OOM for decoder state");
        }
        let mut st = unsafe { Box::from_raw(ptr as *mut Self) };
        st.reset();
        Ok(st)
    }

    // forget everything learned from the previous image
    fn reset(&mut self) {
        self.width = 0;
        self.height = 0;
        self.num_comp = 0;
        self.comp = [Component::default(); MAX_COMP];
        self.max_h = 1;
        self.max_v = 1;
        self.qt_ok = [false; 4];
        self.dc_ok = [false; 4];
        self.ac_ok = [false; 4];
        for ht in self.dc_huff.iter_mut().chain(self.ac_huff.iter_mut()) {
            ht.maxcode.fill(-1);
        }
        self.restart_interval = 0;
        self.scan_num_comp = 0;
        self.scan_order = [0; MAX_COMP];
        self.scan_ss = 0;
        self.scan_se = 0;
    }
}

// buffered input, kept across prepare() and decompress()

struct InputBuf {
    buf: [u8; IN_BUF],
    pos: usize,
    len: usize,
    eof: bool,
}

impl InputBuf {
    const fn new() -> Self {
        Self {
            buf: [0u8; IN_BUF],
            pos: 0,
            len: 0,
            eof: false,
        }
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.len = 0;
        self.eof = false;
    }
}

// byte source over the caller's pull closure
struct Source<'a> {
    inp: &'a mut InputBuf,
    pull: &'a mut dyn FnMut(&mut [u8]) -> usize,
}

impl Source<'_> {
    fn refill(&mut self) {
        self.inp.pos = 0;
        self.inp.len = 0;
        if self.inp.eof {
            return;
        }
        let n = (self.pull)(&mut self.inp.buf).min(IN_BUF);
        if n == 0 {
            self.inp.eof = true;
        }
        self.inp.len = n;
    }

    #[inline]
    fn read_byte(&mut self) -> Result<u8, &'static str> {
        if self.inp.pos >= self.inp.len {
            self.refill();
            if self.inp.len == 0 {
                return Err("jpeg: unexpected end of data");
            }
        }
        let b = self.inp.buf[self.inp.pos];
        self.inp.pos += 1;
        Ok(b)
    }

    fn is_eof(&mut self) -> bool {
        if self.inp.pos < self.inp.len {
            return false;
        }
        self.refill();
        self.inp.len == 0
    }

    fn read_u16(&mut self) -> Result<u16, &'static str> {
        let hi = self.read_byte()?;
        let lo = self.read_byte()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn read_into(&mut self, dst: &mut [u8]) -> Result<(), &'static str> {
        let mut done = 0;
        while done < dst.len() {
            if self.inp.pos >= self.inp.len {
                self.refill();
                if self.inp.len == 0 {
                    return Err("jpeg: truncated segment");
                }
            }
            let n = (self.inp.len - self.inp.pos).min(dst.len() - done);
            dst[done..done + n].copy_from_slice(&self.inp.buf[self.inp.pos..self.inp.pos + n]);
            self.inp.pos += n;
            done += n;
        }
        Ok(())
    }

    fn skip(&mut self, mut n: usize) -> Result<(), &'static str> {
        while n > 0 {
            if self.inp.pos >= self.inp.len {
                self.refill();
                if self.inp.len == 0 {
                    return Err("jpeg: truncated segment");
                }
            }
            let step = (self.inp.len - self.inp.pos).min(n);
            self.inp.pos += step;
            n -= step;
        }
        Ok(())
    }
}

// BitReader over the entropy-coded segment

struct BitReader<'a> {
    source: Source<'a>,
    buf: u32,
    avail: u8,
    marker: u8, // stashed marker byte (non-zero = encountered during next_byte)
    starved: bool,
}

impl<'a> BitReader<'a> {
    fn new(source: Source<'a>) -> Self {
        Self {
            source,
            buf: 0,
            avail: 0,
            marker: 0,
            starved: false,
        }
    }

    // fetch next entropy-coded byte, handling JPEG byte stuffing;
    // a stream cut short is padded with zeros like a trailing marker
    fn next_byte(&mut self) -> Result<u8, &'static str> {
        if self.marker != 0 {
            return Ok(0);
        }
        if self.source.is_eof() {
            if !self.starved {
                log::warn!("jpeg: entropy data truncated, padding");
                self.starved = true;
            }
            self.marker = M_EOI;
            return Ok(0);
        }
        let b = self.source.read_byte()?;
        if b != 0xFF {
            return Ok(b);
        }
        loop {
            if self.source.is_eof() {
                self.marker = M_EOI;
                return Ok(0);
            }
            let next = self.source.read_byte()?;
            match next {
                0x00 => return Ok(0xFF),
                0xFF => continue,
                _ => {
                    self.marker = next;
                    return Ok(0);
                }
            }
        }
    }

    fn ensure(&mut self, n: u8) -> Result<(), &'static str> {
        while self.avail < n {
            let b = self.next_byte()?;
            self.buf |= (b as u32) << (24 - self.avail);
            self.avail += 8;
        }
        Ok(())
    }

    #[inline]
    fn peek(&mut self, n: u8) -> Result<u32, &'static str> {
        self.ensure(n)?;
        Ok(self.buf >> (32 - n as u32))
    }

    #[inline]
    fn drop_bits(&mut self, n: u8) {
        self.buf <<= n as u32;
        self.avail -= n;
    }

    #[inline]
    fn read_bits(&mut self, n: u8) -> Result<u32, &'static str> {
        if n == 0 {
            return Ok(0);
        }
        self.ensure(n)?;
        let val = self.buf >> (32 - n as u32);
        self.buf <<= n as u32;
        self.avail -= n;
        Ok(val)
    }

    // discard remaining bits, advance past the next restart marker
    fn consume_restart(&mut self) -> Result<(), &'static str> {
        self.buf = 0;
        self.avail = 0;

        if self.marker != 0 {
            let m = self.marker;
            // EOI stays latched so the rest of the image decodes as padding
            if m != M_EOI {
                self.marker = 0;
            }
            return Ok(());
        }

        loop {
            if self.source.is_eof() {
                return Ok(());
            }
            let b = self.source.read_byte()?;
            if b != 0xFF {
                continue;
            }
            loop {
                if self.source.is_eof() {
                    return Ok(());
                }
                let m = self.source.read_byte()?;
                match m {
                    0xFF => continue,
                    0x00 => break,
                    _ => return Ok(()),
                }
            }
        }
    }
}

// public API

/// Streaming baseline JPEG decoder. One instance can decode any number of
/// images in sequence; each image needs its own `prepare` call.
pub struct JpegDecoder {
    st: Box<JpegState>,
    input: InputBuf,
    seg: Vec<u8>,
    prepared: bool,
}

impl JpegDecoder {
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            st: JpegState::heap_new()?,
            input: InputBuf::new(),
            seg: Vec::new(),
            prepared: false,
        })
    }

    pub fn width(&self) -> u16 {
        self.st.width
    }

    pub fn height(&self) -> u16 {
        self.st.height
    }

    /// Parse markers up to the start of scan and return `(width, height)`.
    ///
    /// `pull(buf)` copies up to `buf.len()` bytes of the JPEG stream into
    /// `buf` and returns the count; returning 0 means end of input.
    pub fn prepare(
        &mut self,
        pull: &mut dyn FnMut(&mut [u8]) -> usize,
    ) -> Result<(u16, u16), &'static str> {
        self.prepared = false;
        self.st.reset();
        self.input.reset();

        let st = &mut *self.st;
        let seg = &mut self.seg;
        let mut src = Source {
            inp: &mut self.input,
            pull,
        };

        if src.read_byte()? != 0xFF || src.read_byte()? != M_SOI {
            return Err("jpeg: invalid signature");
        }

        loop {
            let marker = next_marker(&mut src)?;
            match marker {
                M_TEM | M_RST0..=M_RST7 => continue,

                M_SOF0 | M_SOF1 => {
                    read_segment(&mut src, seg)?;
                    parse_sof(seg, st)?;
                }
                M_SOF2 => return Err("jpeg: progressive not supported"),
                0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                    return Err("jpeg: unsupported SOF variant");
                }
                M_DHT => {
                    read_segment(&mut src, seg)?;
                    parse_dht(seg, st)?;
                }
                M_DQT => {
                    read_segment(&mut src, seg)?;
                    parse_dqt(seg, st)?;
                }
                M_DRI => {
                    read_segment(&mut src, seg)?;
                    parse_dri(seg, st)?;
                }
                M_SOS => {
                    if st.num_comp == 0 {
                        return Err("jpeg: SOS before SOF");
                    }
                    read_segment(&mut src, seg)?;
                    parse_sos(seg, st)?;
                    validate_tables(st)?;
                    if st.width == 0 || st.height == 0 {
                        return Err("jpeg: zero dimensions");
                    }
                    if (st.width as u32).saturating_mul(st.height as u32) > MAX_PIXELS {
                        return Err("jpeg: exceeds pixel limit");
                    }
                    break;
                }
                M_EOI => return Err("jpeg: EOI before SOS"),
                _ => {
                    let len = src.read_u16()? as usize;
                    if len < 2 {
                        return Err("jpeg: bad marker length");
                    }
                    src.skip(len - 2)?;
                }
            }
        }

        log::debug!(
            "jpeg: {}x{} comps={} mcu={}x{}",
            st.width,
            st.height,
            st.num_comp,
            st.max_h as usize * 8,
            st.max_v as usize * 8
        );
        self.prepared = true;
        Ok((st.width, st.height))
    }

    /// Decode the prepared image, pushing one MCU at a time.
    ///
    /// `scale` selects 1/1, 1/2, 1/4 or 1/8 output (0..=3). `push` gets the
    /// block rectangle and its pixels row-major; returning `false` aborts.
    pub fn decompress(
        &mut self,
        pull: &mut dyn FnMut(&mut [u8]) -> usize,
        push: &mut dyn FnMut(&Rect, &[u16]) -> bool,
        scale: u8,
    ) -> Result<(), &'static str> {
        if !self.prepared {
            return Err("jpeg: decompress before prepare");
        }
        self.prepared = false;
        if scale > 3 {
            return Err("jpeg: scale out of range");
        }

        let st = &*self.st;
        let mut reader = BitReader::new(Source {
            inp: &mut self.input,
            pull,
        });

        let w = st.width as usize;
        let h = st.height as usize;
        let f = 1usize << scale;
        let mcu_w = st.max_h as usize * 8;
        let mcu_h = st.max_v as usize * 8;
        let mcus_x = w.div_ceil(mcu_w);
        let mcus_y = h.div_ceil(mcu_h);
        let total_mcus = (mcus_x * mcus_y) as u32;

        let mut planes = [[0u8; PLANE_SIZE]; MAX_COMP];
        let mut out = [0u16; PLANE_SIZE];
        let mut dc_pred = [0i32; MAX_COMP];
        let mut block = [0i32; 64];
        let mut pix = [0u8; 64];
        let mut mcu_cnt: u32 = 0;

        for mcu_row in 0..mcus_y {
            for mcu_col in 0..mcus_x {
                for sci in 0..st.scan_num_comp as usize {
                    let ci = st.scan_order[sci] as usize;
                    let c = &st.comp[ci];
                    for bv in 0..c.v_samp as usize {
                        for bh in 0..c.h_samp as usize {
                            decode_block(
                                &mut reader,
                                &st.dc_huff[c.dc_tbl as usize],
                                &st.ac_huff[c.ac_tbl as usize],
                                &mut dc_pred[ci],
                                &st.qt[c.qt_idx as usize],
                                &mut block,
                            )?;
                            idct(&block, &mut pix);
                            let plane = &mut planes[ci];
                            for r in 0..8 {
                                let dst = (bv * 8 + r) * PLANE_STRIDE + bh * 8;
                                plane[dst..dst + 8].copy_from_slice(&pix[r * 8..r * 8 + 8]);
                            }
                        }
                    }
                }

                mcu_cnt += 1;
                if st.restart_interval > 0
                    && mcu_cnt % st.restart_interval as u32 == 0
                    && mcu_cnt < total_mcus
                {
                    reader.consume_restart()?;
                    dc_pred.fill(0);
                }

                // clip to the image edge, then subsample by the scale factor
                let x0 = mcu_col * mcu_w;
                let y0 = mcu_row * mcu_h;
                let out_w = mcu_w.min(w - x0).div_ceil(f);
                let out_h = mcu_h.min(h - y0).div_ceil(f);
                for oy in 0..out_h {
                    for ox in 0..out_w {
                        out[oy * out_w + ox] = mcu_pixel(st, &planes, ox * f, oy * f);
                    }
                }

                let rect = Rect {
                    left: (x0 / f) as u16,
                    top: (y0 / f) as u16,
                    right: (x0 / f + out_w - 1) as u16,
                    bottom: (y0 / f + out_h - 1) as u16,
                };
                if !push(&rect, &out[..out_w * out_h]) {
                    return Err("jpeg: output aborted");
                }
            }
        }

        Ok(())
    }
}

// marker scanning

fn next_marker(src: &mut Source<'_>) -> Result<u8, &'static str> {
    loop {
        if src.read_byte()? != 0xFF {
            continue;
        }
        loop {
            match src.read_byte()? {
                0xFF => continue,
                0x00 => break,
                m => return Ok(m),
            }
        }
    }
}

fn read_segment(src: &mut Source<'_>, seg: &mut Vec<u8>) -> Result<(), &'static str> {
    let len = src.read_u16()? as usize;
    if len < 2 {
        return Err("jpeg: bad marker length");
    }
    seg.clear();
    seg.try_reserve(len - 2)
        .map_err(|_| "jpeg: OOM for marker segment")?;
    seg.resize(len - 2, 0);
    src.read_into(seg)
}

// segment parsers; `seg` excludes the 2-byte length field

fn parse_sof(seg: &[u8], st: &mut JpegState) -> Result<(), &'static str> {
    if seg.len() < 6 {
        return Err("jpeg: SOF truncated");
    }
    if seg[0] != 8 {
        return Err("jpeg: only 8-bit precision");
    }
    st.height = be_u16(seg, 1);
    st.width = be_u16(seg, 3);
    st.num_comp = seg[5];
    if st.num_comp != 1 && st.num_comp != 3 {
        return Err("jpeg: unsupported component count");
    }
    if seg.len() < 6 + st.num_comp as usize * 3 {
        return Err("jpeg: SOF truncated");
    }
    let mut off = 6;
    st.max_h = 1;
    st.max_v = 1;
    for i in 0..st.num_comp as usize {
        let samp = seg[off + 1];
        let c = &mut st.comp[i];
        c.id = seg[off];
        c.h_samp = samp >> 4;
        c.v_samp = samp & 0x0F;
        c.qt_idx = seg[off + 2];
        if c.h_samp == 0 || c.v_samp == 0 || c.h_samp > MAX_SAMP || c.v_samp > MAX_SAMP {
            return Err("jpeg: unsupported sampling factor");
        }
        if c.qt_idx >= 4 {
            return Err("jpeg: DQT id out of range");
        }
        st.max_h = st.max_h.max(c.h_samp);
        st.max_v = st.max_v.max(c.v_samp);
        off += 3;
    }
    Ok(())
}

fn parse_dqt(seg: &[u8], st: &mut JpegState) -> Result<(), &'static str> {
    let mut pos = 0usize;
    while pos < seg.len() {
        let info = seg[pos];
        pos += 1;
        let prec = info >> 4;
        let id = (info & 0x0F) as usize;
        if id >= 4 {
            return Err("jpeg: DQT id out of range");
        }
        if prec == 0 {
            if pos + 64 > seg.len() {
                return Err("jpeg: DQT truncated");
            }
            for i in 0..64 {
                st.qt[id][i] = seg[pos + i] as u16;
            }
            pos += 64;
        } else {
            if pos + 128 > seg.len() {
                return Err("jpeg: DQT truncated");
            }
            for i in 0..64 {
                st.qt[id][i] = be_u16(seg, pos + i * 2);
            }
            pos += 128;
        }
        st.qt_ok[id] = true;
    }
    Ok(())
}

fn parse_dht(seg: &[u8], st: &mut JpegState) -> Result<(), &'static str> {
    let mut pos = 0usize;
    while pos < seg.len() {
        if pos + 17 > seg.len() {
            return Err("jpeg: DHT truncated");
        }
        let info = seg[pos];
        pos += 1;
        let class = info >> 4;
        let id = (info & 0x0F) as usize;
        if id >= 4 || class > 1 {
            return Err("jpeg: DHT id out of range");
        }
        let mut bits = [0u8; 16];
        bits.copy_from_slice(&seg[pos..pos + 16]);
        pos += 16;
        let total: usize = bits.iter().map(|&b| b as usize).sum();
        if total > 256 || pos + total > seg.len() {
            return Err("jpeg: DHT value overflow");
        }
        let vals = &seg[pos..pos + total];
        pos += total;
        if class == 0 {
            build_huff_table(&mut st.dc_huff[id], &bits, vals);
            st.dc_ok[id] = true;
        } else {
            build_huff_table(&mut st.ac_huff[id], &bits, vals);
            st.ac_ok[id] = true;
        }
    }
    Ok(())
}

fn parse_dri(seg: &[u8], st: &mut JpegState) -> Result<(), &'static str> {
    if seg.len() < 2 {
        return Err("jpeg: DRI truncated");
    }
    st.restart_interval = be_u16(seg, 0);
    Ok(())
}

fn parse_sos(seg: &[u8], st: &mut JpegState) -> Result<(), &'static str> {
    if seg.is_empty() {
        return Err("jpeg: SOS truncated");
    }
    let ns = seg[0] as usize;
    if ns != st.num_comp as usize {
        return Err("jpeg: non-interleaved scans not supported");
    }
    if seg.len() < 1 + ns * 2 + 3 {
        return Err("jpeg: SOS truncated");
    }
    let mut pos = 1;
    for sci in 0..ns {
        let cs = seg[pos];
        let td_ta = seg[pos + 1];
        pos += 2;
        let Some(j) = st.comp[..st.num_comp as usize]
            .iter()
            .position(|c| c.id == cs)
        else {
            return Err("jpeg: SOS references unknown component");
        };
        let (dc, ac) = (td_ta >> 4, td_ta & 0x0F);
        if dc >= 4 || ac >= 4 {
            return Err("jpeg: DHT id out of range");
        }
        st.comp[j].dc_tbl = dc;
        st.comp[j].ac_tbl = ac;
        st.scan_order[sci] = j as u8;
    }
    st.scan_num_comp = ns as u8;
    st.scan_ss = seg[pos];
    st.scan_se = seg[pos + 1];
    Ok(())
}

fn validate_tables(st: &JpegState) -> Result<(), &'static str> {
    if st.scan_ss != 0 || st.scan_se != 63 {
        return Err("jpeg: unsupported spectral selection");
    }
    for sci in 0..st.scan_num_comp as usize {
        let c = &st.comp[st.scan_order[sci] as usize];
        if !st.qt_ok[c.qt_idx as usize] {
            return Err("jpeg: missing quant table");
        }
        if !st.dc_ok[c.dc_tbl as usize] {
            return Err("jpeg: missing DC Huffman table");
        }
        if !st.ac_ok[c.ac_tbl as usize] {
            return Err("jpeg: missing AC Huffman table");
        }
    }
    Ok(())
}

// Huffman table construction

fn build_huff_table(table: &mut HuffTable, bits: &[u8; 16], vals: &[u8]) {
    let total: usize = bits.iter().map(|&b| b as usize).sum();
    table.values[..total].copy_from_slice(&vals[..total]);
    table.lut.fill((0, 0));
    table.maxcode.fill(-1);

    let mut code: u32 = 0;
    let mut si: usize = 0;

    for bl in 1..=16usize {
        let cnt = bits[bl - 1] as usize;
        if cnt > 0 {
            table.valptr[bl] = si;
            table.mincode[bl] = code as i32;
            for _ in 0..cnt {
                if bl <= 8 {
                    let prefix = (code << (8 - bl)) as usize;
                    let fill = 1usize << (8 - bl);
                    for k in 0..fill {
                        if prefix + k < 256 {
                            table.lut[prefix + k] = (vals[si], bl as u8);
                        }
                    }
                }
                si += 1;
                code += 1;
            }
            table.maxcode[bl] = (code - 1) as i32;
        }
        code <<= 1;
    }
}

// Huffman decode

fn huff_decode(r: &mut BitReader<'_>, t: &HuffTable) -> Result<u8, &'static str> {
    let peek8 = r.peek(8)? as usize;
    let (sym, nb) = t.lut[peek8];
    if nb > 0 {
        r.drop_bits(nb);
        return Ok(sym);
    }
    let peek16 = r.peek(16)? as i32;
    for bl in 9..=16u8 {
        let code = peek16 >> (16 - bl);
        if t.maxcode[bl as usize] >= 0 && code <= t.maxcode[bl as usize] {
            r.drop_bits(bl);
            let idx = t.valptr[bl as usize] as i32 + code - t.mincode[bl as usize];
            return Ok(t.values[idx as usize]);
        }
    }
    Err("jpeg: invalid Huffman code")
}

#[inline]
fn extend(bits: u32, size: u8) -> i32 {
    let half = 1u32 << (size as u32 - 1);
    if bits < half {
        bits as i32 - ((1u32 << size as u32) as i32 - 1)
    } else {
        bits as i32
    }
}

// entropy decode + dequantise one 8x8 block (natural order out)
fn decode_block(
    r: &mut BitReader<'_>,
    dc_ht: &HuffTable,
    ac_ht: &HuffTable,
    dc_pred: &mut i32,
    qt: &[u16; 64],
    blk: &mut [i32; 64],
) -> Result<(), &'static str> {
    blk.fill(0);

    let dc_size = huff_decode(r, dc_ht)?;
    if dc_size > 0 {
        if dc_size > 11 {
            return Err("jpeg: DC size > 11");
        }
        let bits = r.read_bits(dc_size)?;
        *dc_pred += extend(bits, dc_size);
    }
    blk[0] = (*dc_pred).wrapping_mul(qt[0] as i32);

    let mut k: usize = 1;
    while k < 64 {
        let sym = huff_decode(r, ac_ht)?;
        let run = (sym >> 4) as usize;
        let size = sym & 0x0F;
        if size == 0 {
            if run == 15 {
                k += 16;
                continue;
            }
            break;
        }
        k += run;
        if k > 63 {
            return Err("jpeg: AC index overflow");
        }
        let bits = r.read_bits(size)?;
        blk[ZZ[k]] = extend(bits, size).wrapping_mul(qt[k] as i32);
        k += 1;
    }
    Ok(())
}

// integer IDCT (IJG ISLOW, two-pass row + col)

fn idct(block: &[i32; 64], out: &mut [u8; 64]) {
    let mut ws = [0i32; 64];

    for row in 0..8 {
        let b = row * 8;
        let (d0, d1, d2, d3) = (block[b], block[b + 1], block[b + 2], block[b + 3]);
        let (d4, d5, d6, d7) = (block[b + 4], block[b + 5], block[b + 6], block[b + 7]);

        if d1 == 0 && d2 == 0 && d3 == 0 && d4 == 0 && d5 == 0 && d6 == 0 && d7 == 0 {
            ws[b..b + 8].fill(d0 << P1);
            continue;
        }

        let (t10, t11, t12, t13, o0, o1, o2, o3) = butterfly(d0, d1, d2, d3, d4, d5, d6, d7);
        let sh = CB - P1;
        ws[b] = descale(t10 + o3, sh);
        ws[b + 7] = descale(t10 - o3, sh);
        ws[b + 1] = descale(t11 + o2, sh);
        ws[b + 6] = descale(t11 - o2, sh);
        ws[b + 2] = descale(t12 + o1, sh);
        ws[b + 5] = descale(t12 - o1, sh);
        ws[b + 3] = descale(t13 + o0, sh);
        ws[b + 4] = descale(t13 - o0, sh);
    }

    for col in 0..8 {
        let (d0, d1, d2, d3) = (ws[col], ws[col + 8], ws[col + 16], ws[col + 24]);
        let (d4, d5, d6, d7) = (ws[col + 32], ws[col + 40], ws[col + 48], ws[col + 56]);

        if d1 == 0 && d2 == 0 && d3 == 0 && d4 == 0 && d5 == 0 && d6 == 0 && d7 == 0 {
            let v = clamp(descale(d0, P1 + 3) + 128);
            for r in 0..8 {
                out[col + r * 8] = v;
            }
            continue;
        }

        let (t10, t11, t12, t13, o0, o1, o2, o3) = butterfly(d0, d1, d2, d3, d4, d5, d6, d7);
        let sh = CB + P1 + 3;
        out[col] = clamp(descale(t10 + o3, sh) + 128);
        out[col + 56] = clamp(descale(t10 - o3, sh) + 128);
        out[col + 8] = clamp(descale(t11 + o2, sh) + 128);
        out[col + 48] = clamp(descale(t11 - o2, sh) + 128);
        out[col + 16] = clamp(descale(t12 + o1, sh) + 128);
        out[col + 40] = clamp(descale(t12 - o1, sh) + 128);
        out[col + 24] = clamp(descale(t13 + o0, sh) + 128);
        out[col + 32] = clamp(descale(t13 - o0, sh) + 128);
    }
}

// shared even/odd part of one 1-D pass
#[allow(clippy::too_many_arguments)]
#[inline]
fn butterfly(
    d0: i32,
    d1: i32,
    d2: i32,
    d3: i32,
    d4: i32,
    d5: i32,
    d6: i32,
    d7: i32,
) -> (i32, i32, i32, i32, i32, i32, i32, i32) {
    let z1 = (d2 + d6).wrapping_mul(F0541);
    let tmp2 = z1 + d6.wrapping_mul(-F1847);
    let tmp3 = z1 + d2.wrapping_mul(F0765);
    let tmp0 = (d0 + d4) << CB;
    let tmp1 = (d0 - d4) << CB;
    let (t10, t13) = (tmp0 + tmp3, tmp0 - tmp3);
    let (t11, t12) = (tmp1 + tmp2, tmp1 - tmp2);

    let (zz1, zz2, zz3, zz4) = (d7 + d1, d5 + d3, d7 + d3, d5 + d1);
    let z5 = (zz3 + zz4).wrapping_mul(F1175);
    let mut o0 = d7.wrapping_mul(F0298);
    let mut o1 = d5.wrapping_mul(F2053);
    let mut o2 = d3.wrapping_mul(F3072);
    let mut o3 = d1.wrapping_mul(F1501);
    let (s1, s2) = (zz1.wrapping_mul(-F0899), zz2.wrapping_mul(-F2562));
    let s3 = zz3.wrapping_mul(-F1961) + z5;
    let s4 = zz4.wrapping_mul(-F0390) + z5;
    o0 += s1 + s3;
    o1 += s2 + s4;
    o2 += s2 + s3;
    o3 += s1 + s4;

    (t10, t11, t12, t13, o0, o1, o2, o3)
}

// colour conversion

// MCU pixel (px, py) as RGB565, upsampling chroma by replication
#[inline]
fn mcu_pixel(st: &JpegState, planes: &[[u8; PLANE_SIZE]; MAX_COMP], px: usize, py: usize) -> u16 {
    let sample = |ci: usize| {
        let c = &st.comp[ci];
        let sx = px * c.h_samp as usize / st.max_h as usize;
        let sy = py * c.v_samp as usize / st.max_v as usize;
        planes[ci][sy * PLANE_STRIDE + sx]
    };

    let y = sample(0);
    if st.num_comp == 1 {
        return rgb565(y, y, y);
    }
    ycc_to_565(y, sample(1), sample(2))
}

#[inline]
fn ycc_to_565(y: u8, cb: u8, cr: u8) -> u16 {
    let y = y as i32;
    let cb = cb as i32 - 128;
    let cr = cr as i32 - 128;
    // 16.16 fixed point JFIF coefficients
    let r = clamp(y + ((91_881 * cr + 32_768) >> 16));
    let g = clamp(y - ((22_554 * cb + 46_802 * cr + 32_768) >> 16));
    let b = clamp(y + ((116_130 * cb + 32_768) >> 16));
    rgb565(r, g, b)
}

#[inline]
fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

// helpers

#[inline]
fn descale(x: i32, n: i32) -> i32 {
    (x + (1 << (n - 1))) >> n
}

#[inline]
fn clamp(x: i32) -> u8 {
    x.clamp(0, 255) as u8
}

#[inline]
fn be_u16(d: &[u8], o: usize) -> u16 {
    u16::from_be_bytes([d[o], d[o + 1]])
}
