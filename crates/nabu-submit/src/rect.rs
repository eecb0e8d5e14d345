/// Axis-aligned rectangle in physical pixels (top-left origin).
///
/// Used for scissor rects and for the tiles a render target was drawn into.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle covering a whole surface.
    #[inline]
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    #[inline]
    pub fn right(self) -> u32 {
        self.x.saturating_add(self.width)
    }

    #[inline]
    pub fn bottom(self) -> u32 {
        self.y.saturating_add(self.height)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Half-open containment of another rectangle.
    #[inline]
    pub fn contains_rect(self, other: PixelRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    #[inline]
    pub fn intersect(self, other: PixelRect) -> Option<PixelRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());

        if x1 <= x0 || y1 <= y0 {
            None
        } else {
            Some(PixelRect::new(x0, y0, x1 - x0, y1 - y0))
        }
    }

    /// Clips to a `width` x `height` surface.
    #[inline]
    pub fn clamp_to(self, width: u32, height: u32) -> Option<PixelRect> {
        self.intersect(PixelRect::full(width, height))
    }
}
