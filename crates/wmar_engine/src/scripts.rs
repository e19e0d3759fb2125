//! In-page scripts. Each body runs after `PRELUDE` inside a WebDriver
//! `execute` call, so `arguments` holds the serialized parameters.

/// Shared helpers; `resolve(query)` returns matching elements in document order.
pub(crate) const PRELUDE: &str = r#"
const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
const toRe = (p) => new RegExp(p.source, p.case_insensitive ? 'i' : '');
const isVisible = (el) => {
  if (!el || !el.isConnected) return false;
  const style = window.getComputedStyle(el);
  if (style.display === 'none' || style.visibility === 'hidden') return false;
  const rect = el.getBoundingClientRect();
  return rect.width > 0 && rect.height > 0;
};
const SKIP_TYPES = ['hidden', 'submit', 'button', 'reset', 'image'];
const inputsIn = (root) => Array.from(root.querySelectorAll('input, textarea, select'))
  .filter((el) => !SKIP_TYPES.includes((el.getAttribute('type') || '').toLowerCase()));
const labelOf = (el) => {
  const parts = [];
  const aria = el.getAttribute('aria-label');
  if (aria) parts.push(aria);
  const by = el.getAttribute('aria-labelledby');
  if (by) by.split(/\s+/).forEach((id) => {
    const node = document.getElementById(id);
    if (node) parts.push(node.textContent);
  });
  if (el.id) document.querySelectorAll('label[for="' + CSS.escape(el.id) + '"]')
    .forEach((l) => parts.push(l.textContent));
  const wrap = el.closest('label');
  if (wrap) parts.push(wrap.textContent);
  return norm(parts.join(' '));
};
const nameOf = (el) => norm(el.getAttribute('aria-label') || labelOf(el)
  || el.innerText || el.value || el.textContent);
const ROLE_SELECTORS = {
  button: 'button, input[type="submit"], input[type="button"], [role="button"]',
  radio: 'input[type="radio"], [role="radio"]',
  link: 'a[href], [role="link"]',
};
const resolve = (q) => {
  switch (q.kind) {
    case 'label': {
      const re = toRe(q.pattern);
      return inputsIn(document).filter((el) => re.test(labelOf(el)));
    }
    case 'attribute': {
      const needles = q.needles.map((n) => n.toLowerCase());
      return inputsIn(document).filter((el) => {
        const hay = [el.getAttribute('name'), el.id, el.getAttribute('aria-label')]
          .map((v) => (v || '').toLowerCase());
        return needles.some((n) => hay.some((h) => h.includes(n)));
      });
    }
    case 'role': {
      const all = Array.from(document.querySelectorAll(ROLE_SELECTORS[q.role]));
      if (!q.name) return all;
      const re = toRe(q.name);
      return all.filter((el) => re.test(nameOf(el)));
    }
    case 'text': {
      const re = toRe(q.pattern);
      const all = Array.from(document.body ? document.body.querySelectorAll('*') : [])
        .filter((el) => !['SCRIPT', 'STYLE'].includes(el.tagName) && re.test(norm(el.textContent)));
      return all.filter((el) => !all.some((other) => other !== el && el.contains(other)));
    }
    case 'input_like':
      return inputsIn(document.querySelector('main') || document);
    case 'submit_control':
      return Array.from(document.querySelectorAll('button[type="submit"], input[type="submit"]'));
    case 'heading':
      return Array.from(document.querySelectorAll('h1'));
    case 'main':
      return Array.from(document.querySelectorAll('main'));
    case 'body':
      return document.body ? [document.body] : [];
    default:
      return [];
  }
};
"#;

pub(crate) const MARK_SELECTOR: &str = "[data-wmar-target]";

pub(crate) const COUNT: &str = "return resolve(arguments[0]).length;";

pub(crate) const IS_VISIBLE: &str = r#"
const els = resolve(arguments[0]);
return els.length > 0 && isVisible(els[0]);
"#;

/// Tags the `arguments[1]`-th match so a native WebDriver lookup can reach it.
pub(crate) const MARK: &str = r#"
document.querySelectorAll('[data-wmar-target]').forEach((el) => el.removeAttribute('data-wmar-target'));
const el = resolve(arguments[0])[arguments[1]];
if (!el) return false;
el.setAttribute('data-wmar-target', '1');
el.scrollIntoView({ block: 'center' });
return true;
"#;

pub(crate) const FORCE_CLICK: &str = r#"
const el = resolve(arguments[0])[0];
if (!el) return false;
el.click();
return true;
"#;

pub(crate) const CHECK: &str = r#"
const el = resolve(arguments[0])[0];
if (!el) return false;
el.checked = true;
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
return true;
"#;

pub(crate) const INNER_TEXT: &str = r#"
const el = resolve(arguments[0])[0];
return el ? el.innerText : null;
"#;

/// Uses the prototype setter so framework-managed inputs see the change.
pub(crate) const SET_VALUE: &str = r#"
const el = resolve(arguments[0])[arguments[1]];
if (!el) return false;
const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype
  : el instanceof HTMLSelectElement ? HTMLSelectElement.prototype
  : HTMLInputElement.prototype;
const descriptor = Object.getOwnPropertyDescriptor(proto, 'value');
if (descriptor && descriptor.set) descriptor.set.call(el, arguments[2]);
else el.value = arguments[2];
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
el.dispatchEvent(new Event('blur'));
return true;
"#;

pub(crate) const FORCE_SELECT: &str = r#"
const re = toRe(arguments[0]);
const label = Array.from(document.querySelectorAll('label')).find((l) => re.test(l.textContent || ''));
let el = null;
if (label) {
  const target = label.getAttribute('for');
  el = target ? document.getElementById(target) : label.querySelector('input[type="radio"]');
}
el = el || document.querySelector('input[type="radio"]');
if (!el) return false;
el.checked = true;
if (typeof el.click === 'function') el.click();
el.dispatchEvent(new Event('change', { bubbles: true }));
return true;
"#;

pub(crate) const FRAME_COUNT: &str = "return window.frames.length;";

pub(crate) const READY_PROBE: &str =
    "return [document.readyState, performance.getEntriesByType('resource').length];";

pub(crate) const MASK_AUTOMATION: &str = r#"
try { Object.defineProperty(navigator, 'webdriver', { get: () => false }); } catch (e) {}
return true;
"#;

pub(crate) fn with_prelude(body: &str) -> String {
    format!("{PRELUDE}\n{body}")
}
