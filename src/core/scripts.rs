use crate::core::stabilize::StabilizePolicy;

/// Attributes lazy-loading libraries stash the real source in, in order of
/// preference.
pub const LAZY_ATTRS: &[&str] = &[
    "data-src",
    "data-lazy-src",
    "data-original",
    "data-lazy",
    "data-url",
    "data-echo",
    "data-img-src",
    "data-srcset",
];

/// Iframe hosts treated as known video-embed providers. Matched against the
/// frame's hostname, including subdomains.
pub const EMBED_HOSTS: &[&str] = &[
    "youtube.com",
    "youtube-nocookie.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "player.twitch.tv",
    "streamable.com",
    "rumble.com",
];

/// First payload, injected right after navigation. Announces PAGE_LOADED once
/// the document finishes loading (immediately when injection happens after
/// the load event already fired).
pub fn bootstrap_script() -> String {
    BOOTSTRAP_TEMPLATE.to_string()
}

/// Second payload: the stabilization loop. A self-rescheduling step function
/// scrolls through the document, forces lazy sources live, and posts
/// READY_FOR_EXTRACTION once the resolved-image count stops changing (or the
/// attempt budget runs out). Thresholds come from the policy so host and page
/// share one source of truth.
pub fn prepare_script(policy: &StabilizePolicy) -> String {
    PREPARE_TEMPLATE
        .replace("__LAZY_ATTRS__", &js_string_array(LAZY_ATTRS))
        .replace("__STABLE_STEPS__", &policy.stable_steps_required.to_string())
        .replace("__MAX_ATTEMPTS__", &policy.max_scroll_attempts.to_string())
        .replace("__STEP_DELAY_MS__", &policy.step_delay_ms.to_string())
}

/// Terminal payload. Walks the DOM once (guarded by a started flag, so a
/// second injection is a no-op), collects candidate media, dedupes by url and
/// posts EXTRACTION_RESULT.
pub fn extract_script() -> String {
    EXTRACT_TEMPLATE
        .replace("__LAZY_ATTRS__", &js_string_array(LAZY_ATTRS))
        .replace("__EMBED_HOSTS__", &js_string_array(EMBED_HOSTS))
}

fn js_string_array(values: &[&str]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

const BOOTSTRAP_TEMPLATE: &str = r#"
(function () {
  if (window.__mediagrabBooted) { return; }
  window.__mediagrabBooted = true;
  window.__mediagrabPost = function (msg) {
    try { window.__mediagrab_emit(JSON.stringify(msg)); } catch (e) {}
  };
  var announce = function () { window.__mediagrabPost({ type: 'PAGE_LOADED' }); };
  if (document.readyState === 'complete') {
    announce();
  } else {
    window.addEventListener('load', announce, { once: true });
  }
})();
"#;

const PREPARE_TEMPLATE: &str = r#"
(function () {
  if (window.__mediagrabPreparing) { return; }
  window.__mediagrabPreparing = true;
  var LAZY_ATTRS = __LAZY_ATTRS__;
  var STABLE_STEPS = __STABLE_STEPS__;
  var MAX_ATTEMPTS = __MAX_ATTEMPTS__;
  var STEP_DELAY = __STEP_DELAY_MS__;
  var attempts = 0;
  var stableStreak = 0;
  var lastCount = -1;

  function pageHeight() {
    return Math.max(
      document.body ? document.body.scrollHeight : 0,
      document.documentElement ? document.documentElement.scrollHeight : 0
    );
  }

  function scrollStepCount() {
    var v = window.innerHeight || 1;
    return Math.max(10, Math.ceil(pageHeight() / (v / 3)));
  }

  function resolvedImageCount() {
    var imgs = document.getElementsByTagName('img');
    var n = 0;
    for (var i = 0; i < imgs.length; i++) {
      if (imgs[i].src) { n++; }
    }
    return n;
  }

  function forceLazySources() {
    var imgs = document.getElementsByTagName('img');
    for (var i = 0; i < imgs.length; i++) {
      var img = imgs[i];
      try {
        for (var j = 0; j < LAZY_ATTRS.length; j++) {
          var v = img.getAttribute(LAZY_ATTRS[j]);
          if (v && img.src !== v) {
            img.src = v;
            img.style.visibility = 'visible';
            img.style.opacity = '1';
            break;
          }
        }
      } catch (e) {}
    }
  }

  function step() {
    attempts++;
    var steps = scrollStepCount();
    var offset = ((attempts - 1) % steps + 1) * (pageHeight() / steps);
    window.scrollTo(0, offset);
    forceLazySources();
    var count = resolvedImageCount();
    if (count === lastCount) {
      stableStreak++;
    } else {
      stableStreak = 0;
      lastCount = count;
    }
    window.__mediagrabPost({
      type: 'EXTRACTION_PROGRESS',
      message: 'scroll ' + attempts + '/' + steps + ', ' + count + ' images resolved'
    });
    if (stableStreak >= STABLE_STEPS || attempts >= MAX_ATTEMPTS) {
      window.scrollTo(0, 0);
      window.__mediagrabPost({ type: 'READY_FOR_EXTRACTION' });
      return;
    }
    setTimeout(step, STEP_DELAY);
  }

  step();
})();
"#;

const EXTRACT_TEMPLATE: &str = r#"
(function () {
  if (window.__mediagrabExtracted) { return; }
  window.__mediagrabExtracted = true;
  var LAZY_ATTRS = __LAZY_ATTRS__;
  var EMBED_HOSTS = __EMBED_HOSTS__;
  var seen = {};
  var items = [];

  function absolute(u) {
    try { return new URL(u, document.baseURI).href; } catch (e) { return null; }
  }

  function nameFromUrl(u) {
    try {
      var segs = new URL(u).pathname.split('/').filter(function (s) { return s.length > 0; });
      var last = segs.length ? segs[segs.length - 1] : '';
      return last ? decodeURIComponent(last) : 'media';
    } catch (e) { return 'media'; }
  }

  function formatOf(name) {
    var dot = name.lastIndexOf('.');
    if (dot <= 0 || dot === name.length - 1) { return 'standard'; }
    var ext = name.slice(dot + 1).toLowerCase();
    return /^[a-z0-9]{1,5}$/.test(ext) ? ext : 'standard';
  }

  function push(url, type, extra) {
    if (!url || url.indexOf('data:') === 0) { return; }
    var abs = absolute(url);
    if (!abs || seen[abs]) { return; }
    seen[abs] = true;
    var name = nameFromUrl(abs);
    var item = { url: abs, type: type, filename: name, format: formatOf(name) };
    if (extra) {
      for (var k in extra) { item[k] = extra[k]; }
    }
    items.push(item);
  }

  function bestSrcsetCandidate(srcset) {
    var best = null;
    var bestW = -1;
    var parts = srcset.split(',');
    for (var i = 0; i < parts.length; i++) {
      var bits = parts[i].trim().split(/\s+/);
      if (!bits[0]) { continue; }
      var w = bits[1] ? parseInt(bits[1], 10) || 0 : 0;
      if (w > bestW) { bestW = w; best = bits[0]; }
    }
    return best;
  }

  var imgs = document.getElementsByTagName('img');
  for (var i = 0; i < imgs.length; i++) {
    try {
      var img = imgs[i];
      var extra = {};
      if (img.naturalWidth > 0 && img.naturalHeight > 0) {
        extra.width = img.naturalWidth;
        extra.height = img.naturalHeight;
      }
      if (img.src) { push(img.src, 'image', extra); }
      if (img.srcset) {
        var best = bestSrcsetCandidate(img.srcset);
        if (best) { push(best, 'image', extra); }
      }
      for (var j = 0; j < LAZY_ATTRS.length; j++) {
        var v = img.getAttribute(LAZY_ATTRS[j]);
        if (v) { push(v, 'image', null); }
      }
    } catch (e) {}
  }

  var bgRe = /url\(["']?([^"')]+)["']?\)/g;
  var all = document.getElementsByTagName('*');
  var pseudos = [null, ':before', ':after'];
  for (var i = 0; i < all.length; i++) {
    for (var p = 0; p < pseudos.length; p++) {
      try {
        var bg = window.getComputedStyle(all[i], pseudos[p]).backgroundImage;
        if (!bg || bg === 'none') { continue; }
        var m;
        bgRe.lastIndex = 0;
        while ((m = bgRe.exec(bg)) !== null) {
          push(m[1], 'image', null);
        }
      } catch (e) {}
    }
  }

  var videos = document.getElementsByTagName('video');
  for (var i = 0; i < videos.length; i++) {
    try {
      var video = videos[i];
      if (video.src) { push(video.src, 'video', null); }
      if (video.poster) { push(video.poster, 'image', null); }
      var sources = video.getElementsByTagName('source');
      for (var j = 0; j < sources.length; j++) {
        if (sources[j].src) { push(sources[j].src, 'video', null); }
      }
    } catch (e) {}
  }

  var audios = document.getElementsByTagName('audio');
  for (var i = 0; i < audios.length; i++) {
    try {
      var audio = audios[i];
      if (audio.src) { push(audio.src, 'audio', null); }
      var sources = audio.getElementsByTagName('source');
      for (var j = 0; j < sources.length; j++) {
        if (sources[j].src) { push(sources[j].src, 'audio', null); }
      }
    } catch (e) {}
  }

  var iframes = document.getElementsByTagName('iframe');
  for (var i = 0; i < iframes.length; i++) {
    try {
      var src = iframes[i].src;
      if (!src) { continue; }
      var host = new URL(src).hostname;
      var known = EMBED_HOSTS.some(function (h) {
        return host === h || host.endsWith('.' + h);
      });
      if (known) { push(src, 'video', { isEmbed: true }); }
    } catch (e) {}
  }

  var stats = { totalItems: items.length, imageCount: 0, videoCount: 0, audioCount: 0 };
  for (var i = 0; i < items.length; i++) {
    if (items[i].type === 'image') { stats.imageCount++; }
    else if (items[i].type === 'video') { stats.videoCount++; }
    else if (items[i].type === 'audio') { stats.audioCount++; }
  }

  window.__mediagrabPost({ type: 'EXTRACTION_RESULT', data: items, stats: stats });
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_is_guarded_and_announces_load() {
        let js = bootstrap_script();
        assert!(js.contains("__mediagrabBooted"));
        assert!(js.contains("PAGE_LOADED"));
        assert!(js.contains("readyState === 'complete'"));
    }

    #[test]
    fn prepare_embeds_policy_thresholds() {
        let js = prepare_script(&StabilizePolicy {
            stable_steps_required: 7,
            max_scroll_attempts: 21,
            step_delay_ms: 333,
        });
        assert!(js.contains("var STABLE_STEPS = 7;"));
        assert!(js.contains("var MAX_ATTEMPTS = 21;"));
        assert!(js.contains("var STEP_DELAY = 333;"));
        assert!(!js.contains("__STABLE_STEPS__"));
    }

    #[test]
    fn prepare_forces_lazy_attributes_onto_src() {
        let js = prepare_script(&StabilizePolicy::default());
        assert!(js.contains("\"data-src\""));
        assert!(js.contains("img.src = v"));
        assert!(js.contains("READY_FOR_EXTRACTION"));
    }

    #[test]
    fn prepare_uses_the_step_count_formula() {
        let js = prepare_script(&StabilizePolicy::default());
        assert!(js.contains("Math.max(10, Math.ceil(pageHeight() / (v / 3)))"));
    }

    #[test]
    fn extract_is_idempotently_guarded() {
        let js = extract_script();
        assert!(js.contains("if (window.__mediagrabExtracted) { return; }"));
        assert!(js.contains("window.__mediagrabExtracted = true;"));
    }

    #[test]
    fn extract_covers_every_source_kind() {
        let js = extract_script();
        assert!(js.contains("getElementsByTagName('img')"));
        assert!(js.contains("backgroundImage"));
        assert!(js.contains(":before"));
        assert!(js.contains(":after"));
        assert!(js.contains("getElementsByTagName('video')"));
        assert!(js.contains("getElementsByTagName('audio')"));
        assert!(js.contains("video.poster"));
        assert!(js.contains("getElementsByTagName('iframe')"));
    }

    #[test]
    fn extract_embeds_the_provider_allow_list() {
        let js = extract_script();
        for host in EMBED_HOSTS {
            assert!(js.contains(host), "missing embed host {}", host);
        }
        assert!(!js.contains("__EMBED_HOSTS__"));
    }

    #[test]
    fn extract_skips_data_uris() {
        let js = extract_script();
        assert!(js.contains("url.indexOf('data:') === 0"));
    }

    #[test]
    fn payloads_post_through_the_binding() {
        assert!(bootstrap_script().contains("window.__mediagrab_emit"));
        assert!(prepare_script(&StabilizePolicy::default()).contains("__mediagrabPost"));
        assert!(extract_script().contains("EXTRACTION_RESULT"));
    }
}
