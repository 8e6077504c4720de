//! Sequential concatenation of sources.

use tracing::debug;

use crate::error::StreamResult;
use crate::stream::{Source, Transfer};

type Hook<'a> = Box<dyn FnMut(usize) + 'a>;

/// Reads each source to end-of-stream, then moves to the next.
///
/// `on_begin` fires before the first read of a constituent and `on_end` after
/// it reports end-of-stream; both receive the constituent's index. Empty
/// constituents get both hooks too.
pub struct ConcatSource<'a, S> {
    sources: Vec<S>,
    current: usize,
    begun: bool,
    on_begin: Option<Hook<'a>>,
    on_end: Option<Hook<'a>>,
}

impl<'a, S: Source> ConcatSource<'a, S> {
    /// Concatenates `sources` in order.
    pub fn new(sources: Vec<S>) -> Self {
        Self {
            sources,
            current: 0,
            begun: false,
            on_begin: None,
            on_end: None,
        }
    }

    /// Sets the hook run before each constituent.
    pub fn on_begin(mut self, hook: impl FnMut(usize) + 'a) -> Self {
        self.on_begin = Some(Box::new(hook));
        self
    }

    /// Sets the hook run after each constituent ends.
    pub fn on_end(mut self, hook: impl FnMut(usize) + 'a) -> Self {
        self.on_end = Some(Box::new(hook));
        self
    }

    /// Appends another source.
    pub fn push(&mut self, source: S) {
        self.sources.push(source);
    }

    /// Number of constituents.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True with no constituents.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Index of the constituent being read; equals [`ConcatSource::len`] when done.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Mutable access to the constituent being read, e.g. to open it lazily.
    pub fn current_mut(&mut self) -> Option<&mut S> {
        self.sources.get_mut(self.current)
    }

    /// The constituents.
    pub fn into_sources(self) -> Vec<S> {
        self.sources
    }
}

impl<S: Source> Source for ConcatSource<'_, S> {
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        while self.current < self.sources.len() {
            if !self.begun {
                debug!(index = self.current, count = self.sources.len(), "concat begin");
                if let Some(hook) = self.on_begin.as_mut() {
                    hook(self.current);
                }
                self.begun = true;
            }
            match self.sources[self.current].read(dest)? {
                Transfer::Bytes(n) => return Ok(Transfer::Bytes(n)),
                Transfer::EndOfStream => {
                    debug!(index = self.current, "concat end");
                    if let Some(hook) = self.on_end.as_mut() {
                        hook(self.current);
                    }
                    self.current += 1;
                    self.begun = false;
                }
            }
        }
        Ok(Transfer::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::stream::read_to_end;

    #[test]
    fn test_concatenates_in_order() {
        let parts = vec![
            Buffer::from_slice(b"hello"),
            Buffer::new(),
            Buffer::from_slice(b", world"),
        ];
        let mut events = Vec::new();
        {
            let events = std::cell::RefCell::new(&mut events);
            let mut concat = ConcatSource::new(parts)
                .on_begin(|i| events.borrow_mut().push(("begin", i)))
                .on_end(|i| events.borrow_mut().push(("end", i)));
            let out = read_to_end(&mut concat, 4).unwrap();
            assert_eq!(out, b"hello, world");
            assert_eq!(concat.current_index(), 3);
        }
        assert_eq!(
            events,
            vec![
                ("begin", 0),
                ("end", 0),
                ("begin", 1),
                ("end", 1),
                ("begin", 2),
                ("end", 2),
            ]
        );
    }

    #[test]
    fn test_reads_stop_at_constituent_boundary() {
        let mut concat = ConcatSource::new(vec![Buffer::from_slice(b"ab"), Buffer::from_slice(b"cd")]);
        let mut buf = [0u8; 8];
        assert_eq!(concat.read(&mut buf).unwrap(), Transfer::Bytes(2));
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(concat.read(&mut buf).unwrap(), Transfer::Bytes(2));
        assert_eq!(&buf[..2], b"cd");
        assert_eq!(concat.read(&mut buf).unwrap(), Transfer::EndOfStream);
        assert_eq!(concat.read(&mut buf).unwrap(), Transfer::EndOfStream);
    }

    #[test]
    fn test_empty_list_is_eos() {
        let mut concat: ConcatSource<'_, Buffer> = ConcatSource::new(Vec::new());
        assert!(concat.is_empty());
        let mut buf = [0u8; 1];
        assert_eq!(concat.read(&mut buf).unwrap(), Transfer::EndOfStream);
    }

    #[test]
    fn test_push_extends_stream() {
        let mut concat = ConcatSource::new(vec![Buffer::from_slice(b"x")]);
        concat.push(Buffer::from_slice(b"yz"));
        assert_eq!(concat.len(), 2);
        assert_eq!(read_to_end(&mut concat, 16).unwrap(), b"xyz");
    }
}
