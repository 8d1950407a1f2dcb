// nodes/portal.rs — cross-pipeline references.
//
// A portal sink retains the last message it saw in a shared cell; a
// portal source in another (or the same) pipeline republishes it. The
// source holds only a weak reference — portals are lookup + validate,
// never ownership — and fails with an illegal-operation error when the
// sink is gone or has not produced yet.
//
// The sink copies incoming textures into a persistent texture it owns, so
// the published message stays valid after the producing run returns its
// scratch to the pool.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::gpu::{DeviceContext, TextureFormat, TextureHandle};
use crate::pipeline::message::Message;
use crate::pipeline::port::MessageKind;

/// Shared cell linking a portal sink to its sources.
///
/// Clone one per source; drop all clones (and release the sink) to tear
/// the portal down.
#[derive(Clone)]
pub struct PortalHandle {
    pub(crate) cell: Rc<RefCell<Option<Message>>>,
    pub(crate) kind: MessageKind,
}

impl PortalHandle {
    pub(crate) fn new(kind: MessageKind) -> Self {
        PortalHandle {
            cell: Rc::new(RefCell::new(None)),
            kind,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

pub(crate) struct PortalSink {
    cell: Rc<RefCell<Option<Message>>>,
    retained: Option<TextureHandle>,
    dims: Option<(u32, u32)>,
}

impl PortalSink {
    pub(crate) fn new(handle: &PortalHandle) -> Self {
        PortalSink {
            cell: Rc::clone(&handle.cell),
            retained: None,
            dims: None,
        }
    }

    pub(crate) fn run(
        &mut self,
        ctx: &mut DeviceContext,
        inputs: &[&Message],
    ) -> Result<Vec<Message>> {
        let message = inputs[0];

        let published = match message {
            Message::Image { texture, format } => {
                let retained = self.retain_copy(ctx, *texture)?;
                Message::Image {
                    texture: retained,
                    format: *format,
                }
            }
            Message::Keypoints {
                encoded,
                descriptor_size,
                extra_size,
                encoder_length,
            } => {
                let retained = self.retain_copy(ctx, *encoded)?;
                Message::Keypoints {
                    encoded: retained,
                    descriptor_size: *descriptor_size,
                    extra_size: *extra_size,
                    encoder_length: *encoder_length,
                }
            }
            // Host-value messages need no texture bookkeeping.
            other => other.clone(),
        };

        *self.cell.borrow_mut() = Some(published);
        Ok(Vec::new())
    }

    /// Copy `source` into this sink's persistent texture, reallocating
    /// when the incoming dimensions change.
    fn retain_copy(
        &mut self,
        ctx: &mut DeviceContext,
        source: TextureHandle,
    ) -> Result<TextureHandle> {
        let (width, height) = {
            let t = ctx.texture(source);
            (t.width(), t.height())
        };
        if self.dims != Some((width, height)) {
            if let Some(old) = self.retained.take() {
                ctx.release_persistent(old);
            }
            self.retained = Some(ctx.create_texture(width, height, TextureFormat::Rgba8)?);
            self.dims = Some((width, height));
        }
        let retained = self.retained.expect("allocated above");
        ctx.copy_texture(source, retained)?;
        Ok(retained)
    }

    pub(crate) fn release(&mut self, ctx: &mut DeviceContext) {
        if let Some(handle) = self.retained.take() {
            ctx.release_persistent(handle);
        }
        self.dims = None;
        *self.cell.borrow_mut() = None;
    }
}

pub(crate) struct PortalSource {
    cell: Weak<RefCell<Option<Message>>>,
}

impl PortalSource {
    pub(crate) fn new(handle: &PortalHandle) -> Self {
        PortalSource {
            cell: Rc::downgrade(&handle.cell),
        }
    }

    pub(crate) fn run(&mut self) -> Result<Vec<Message>> {
        let cell = self.cell.upgrade().ok_or_else(|| {
            Error::IllegalOperation("portal source references a released sink".into())
        })?;
        let message = cell.borrow().clone().ok_or_else(|| {
            Error::IllegalOperation("portal sink has not produced a message yet".into())
        })?;
        Ok(vec![message])
    }
}
