/// Read-only, bounds-delimited view over the bytes of one received frame.
///
/// Every accessor checks the requested range against the captured length
/// before reading and yields `None` instead of touching memory past the end.
pub trait FrameView {
    /// Captured length, `data_end - data`.
    fn len(&self) -> usize;

    /// Index of the interface the frame arrived on.
    fn ingress_ifindex(&self) -> u32;

    /// Copies `N` bytes starting at `offset`, or `None` if they do not fit.
    fn load<const N: usize>(&self, offset: usize) -> Option<[u8; N]>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load_be16(&self, offset: usize) -> Option<u16> {
        self.load::<2>(offset).map(u16::from_be_bytes)
    }
}

/// Frame view over an in-memory byte slice.
#[derive(Copy, Clone, Debug)]
pub struct SliceFrame<'a> {
    bytes: &'a [u8],
    ingress_ifindex: u32,
}

impl<'a> SliceFrame<'a> {
    pub fn new(bytes: &'a [u8], ingress_ifindex: u32) -> Self {
        Self {
            bytes,
            ingress_ifindex,
        }
    }
}

impl FrameView for SliceFrame<'_> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline(always)]
    fn ingress_ifindex(&self) -> u32 {
        self.ingress_ifindex
    }

    #[inline(always)]
    fn load<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        let src = self.bytes.get(offset..end)?;
        let mut out = [0u8; N];
        out.copy_from_slice(src);
        Some(out)
    }
}
