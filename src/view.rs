//! Binding between loaders and image-displaying views
//!
//! These helpers pass straight through to [`Loader`], using the view's
//! [`TargetId`] as the target. The view is captured weakly: a view that is
//! dropped while its load is pending simply never gets the image.

use std::sync::{Arc, Weak};

use crate::decode::SharedImage;
use crate::loader::{LoadOutcome, Loader, TargetId};
use crate::locator::Locator;

/// Something that shows an image
pub trait ImageView: Send + Sync + 'static {
    /// Stable identity of this view for cancellation
    fn target_id(&self) -> TargetId;

    fn set_image(&self, image: SharedImage);
}

/// Load `locator` into `view`
pub fn load_from_locator<V: ImageView>(loader: &Loader, view: &Arc<V>, locator: &Locator) {
    load_from_locator_with(loader, view, locator, |_| {});
}

/// Load `locator` into `view`, then run `completion`.
///
/// When the outcome's location is not `Cache` the image arrived later than
/// the call, so list-style UIs may need to refresh the containing cell.
pub fn load_from_locator_with<V, F>(loader: &Loader, view: &Arc<V>, locator: &Locator, completion: F)
where
    V: ImageView,
    F: FnOnce(LoadOutcome) + Send + 'static,
{
    let weak: Weak<V> = Arc::downgrade(view);
    loader.load_image_for(locator, view.target_id(), move |outcome| {
        if let (Some(view), Some(image)) = (weak.upgrade(), outcome.image.as_ref()) {
            view.set_image(Arc::clone(image));
        }
        completion(outcome);
    });
}

/// Cancel every load issued for `view`
pub fn cancel_all_for_view<V: ImageView>(loader: &Loader, view: &V) {
    loader.cancel_loading_images_for_target(view.target_id());
}

/// Cancel the load of `locator` for `view` only
pub fn cancel_for_locator<V: ImageView>(loader: &Loader, view: &V, locator: &Locator) {
    loader.cancel_loading_image_for(locator, view.target_id());
}
